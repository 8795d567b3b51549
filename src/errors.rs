use thiserror::Error;

use crate::validation::ValidationResult;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("address failed validation on {} field(s)", .0.errors.len())]
    Validation(ValidationResult),
    #[error("provider error (status {status:?}): {message}")]
    Provider {
        status: Option<u16>,
        message: String,
    },
    #[error("operation {correlation_id} still pending after {attempts} polls")]
    PollingTimeout {
        correlation_id: String,
        attempts: u32,
    },
    #[error("operation {correlation_id} failed: {reason}")]
    PollingFailed {
        correlation_id: String,
        reason: String,
    },
    #[error("{0}")]
    Config(String),
    #[error("save failed: {0}")]
    Save(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::Provider {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Provider { status, .. } => *status,
            AppError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
