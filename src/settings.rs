use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

const MAX_QUEUE_CONCURRENCY: usize = 16;
const MAX_DEBOUNCE_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub queue_concurrency: usize,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuntimeSettingsPayload {
    pub queue_concurrency: Option<usize>,
    pub debounce_ms: Option<u64>,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue_concurrency: clamp_concurrency(config.queue_concurrency),
            debounce_ms: clamp_debounce(config.debounce_ms),
        }
    }

    pub fn apply_patch(&mut self, payload: &UpdateRuntimeSettingsPayload) {
        if let Some(concurrency) = payload.queue_concurrency {
            self.queue_concurrency = clamp_concurrency(concurrency);
        }
        if let Some(delay) = payload.debounce_ms {
            self.debounce_ms = clamp_debounce(delay);
        }
    }
}

impl UpdateRuntimeSettingsPayload {
    pub fn sanitized(mut self) -> Self {
        if let Some(concurrency) = self.queue_concurrency {
            self.queue_concurrency = Some(clamp_concurrency(concurrency));
        }
        if let Some(delay) = self.debounce_ms {
            self.debounce_ms = Some(clamp_debounce(delay));
        }
        self
    }
}

fn clamp_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_QUEUE_CONCURRENCY)
}

fn clamp_debounce(value: u64) -> u64 {
    value.min(MAX_DEBOUNCE_MS)
}
