use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::suggestion::{ProviderSource, RawSuggestion, SuggestionProvider, TesResult};

const USER_AGENT: &str = "address-verifier/0.1.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TesRequest {
    pub query: String,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Pending,
    Completed(Vec<TesResult>),
    Failed(String),
}

/// Submit-then-poll collaborator.
#[async_trait]
pub trait LongRunningOperation: Send + Sync {
    async fn submit(&self, request: &TesRequest) -> AppResult<String>;

    async fn status(&self, correlation_id: &str) -> AppResult<OperationStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.tes_poll_interval_ms),
            max_polls: config.tes_max_polls.max(1),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 10,
        }
    }
}

/// Submits `request` and polls its status every `policy.interval` until it
/// completes, fails, or `policy.max_polls` polls have been spent.
pub async fn poll_until_complete(
    operation: &dyn LongRunningOperation,
    request: &TesRequest,
    policy: PollPolicy,
) -> AppResult<Vec<TesResult>> {
    let correlation_id = operation.submit(request).await?;
    debug!(correlation_id = %correlation_id, "long-running lookup submitted");

    for attempt in 1..=policy.max_polls {
        sleep(policy.interval).await;
        match operation.status(&correlation_id).await? {
            OperationStatus::Completed(items) => {
                debug!(
                    correlation_id = %correlation_id,
                    attempt,
                    count = items.len(),
                    "long-running lookup completed"
                );
                return Ok(items);
            }
            OperationStatus::Failed(reason) => {
                return Err(AppError::PollingFailed {
                    correlation_id,
                    reason,
                });
            }
            OperationStatus::Pending => {
                trace!(correlation_id = %correlation_id, attempt, "still pending");
            }
        }
    }

    Err(AppError::PollingTimeout {
        correlation_id,
        attempts: policy.max_polls,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    correlation_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WireStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: WireStatus,
    #[serde(default)]
    suggestions: Vec<TesResult>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<StatusResponse> for OperationStatus {
    fn from(value: StatusResponse) -> Self {
        match value.status {
            WireStatus::Pending => OperationStatus::Pending,
            WireStatus::Completed => OperationStatus::Completed(value.suggestions),
            WireStatus::Failed => OperationStatus::Failed(
                value.reason.unwrap_or_else(|| "unspecified failure".into()),
            ),
        }
    }
}

/// JSON-over-HTTP adapter for the TES request/status endpoints.
#[derive(Clone)]
pub struct HttpTesClient {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpTesClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<SecretString>) -> AppResult<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(AppError::Config("TES endpoint must not be empty".into()));
        }
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn maybe_new(config: &AppConfig) -> AppResult<Option<Self>> {
        match config.tes_endpoint.as_deref() {
            Some(endpoint) => Self::new(endpoint, config.tes_api_key.clone()).map(Some),
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key.expose_secret()),
            None => request,
        }
    }

    async fn checked(response: Response) -> AppResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            format!("TES request failed ({status})")
        } else {
            format!("TES request failed ({status}): {}", body.trim())
        };
        Err(AppError::provider(Some(status.as_u16()), message))
    }
}

#[async_trait]
impl LongRunningOperation for HttpTesClient {
    async fn submit(&self, request: &TesRequest) -> AppResult<String> {
        let response = self
            .authorize(self.http.post(format!("{}/requests", self.endpoint)))
            .json(request)
            .send()
            .await?;
        let submitted: SubmitResponse = Self::checked(response).await?.json().await?;
        Ok(submitted.correlation_id)
    }

    async fn status(&self, correlation_id: &str) -> AppResult<OperationStatus> {
        let response = self
            .authorize(
                self.http
                    .get(format!("{}/requests/{}", self.endpoint, correlation_id)),
            )
            .send()
            .await?;
        let status: StatusResponse = Self::checked(response).await?.json().await?;
        Ok(status.into())
    }
}

/// Exposes a long-running operation as a regular suggestion provider.
pub struct TesSuggestionProvider {
    operation: Arc<dyn LongRunningOperation>,
    policy: PollPolicy,
}

impl TesSuggestionProvider {
    pub fn new(operation: Arc<dyn LongRunningOperation>, policy: PollPolicy) -> Self {
        Self { operation, policy }
    }
}

#[async_trait]
impl SuggestionProvider for TesSuggestionProvider {
    fn source(&self) -> ProviderSource {
        ProviderSource::Tes
    }

    async fn suggest(&self, free_text: &str, country_code: &str) -> AppResult<Vec<RawSuggestion>> {
        let request = TesRequest {
            query: free_text.to_string(),
            country_code: country_code.to_string(),
        };
        let items = poll_until_complete(self.operation.as_ref(), &request, self.policy).await?;
        Ok(items.into_iter().map(RawSuggestion::Tes).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;

    /// Answers `Pending` a fixed number of times, then the scripted final status.
    pub(crate) struct FakeOperation {
        pending_polls: usize,
        outcome: OperationStatus,
        pub(crate) polls: AtomicUsize,
        pub(crate) submitted: Mutex<Vec<TesRequest>>,
    }

    impl FakeOperation {
        pub(crate) fn new(pending_polls: usize, outcome: OperationStatus) -> Self {
            Self {
                pending_polls,
                outcome,
                polls: AtomicUsize::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LongRunningOperation for FakeOperation {
        async fn submit(&self, request: &TesRequest) -> AppResult<String> {
            self.submitted.lock().push(request.clone());
            Ok("corr-1".into())
        }

        async fn status(&self, _correlation_id: &str) -> AppResult<OperationStatus> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            if poll < self.pending_polls {
                Ok(OperationStatus::Pending)
            } else {
                Ok(self.outcome.clone())
            }
        }
    }

    pub(crate) fn tes_item(street: &str, city: &str) -> TesResult {
        TesResult {
            street: Some(street.into()),
            city: Some(city.into()),
            country_code: Some("PL".into()),
            ..TesResult::default()
        }
    }

    fn policy(max_polls: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1_000),
            max_polls,
        }
    }

    fn request() -> TesRequest {
        TesRequest {
            query: "Main 10, Warsaw".into(),
            country_code: "PL".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_completed() {
        let op = FakeOperation::new(2, OperationStatus::Completed(vec![tes_item("Main", "Warsaw")]));
        let started = Instant::now();
        let items = poll_until_complete(&op, &request(), policy(5)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(op.polls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_polls_is_a_timeout() {
        let op = FakeOperation::new(usize::MAX, OperationStatus::Pending);
        let err = poll_until_complete(&op, &request(), policy(4)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::PollingTimeout { ref correlation_id, attempts: 4 } if correlation_id == "corr-1"
        ));
        assert_eq!(op.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_surfaces_reason() {
        let op = FakeOperation::new(0, OperationStatus::Failed("unknown country".into()));
        let err = poll_until_complete(&op, &request(), policy(4)).await.unwrap_err();
        assert!(matches!(err, AppError::PollingFailed { ref reason, .. } if reason == "unknown country"));
        assert_eq!(op.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_wraps_items_as_tes_suggestions() {
        let op = Arc::new(FakeOperation::new(
            0,
            OperationStatus::Completed(vec![tes_item("Main", "Warsaw"), tes_item("Side", "Łódź")]),
        ));
        let provider = TesSuggestionProvider::new(op.clone(), policy(2));
        let raw = provider.suggest("Main 10, Warsaw", "PL").await.unwrap();

        assert_eq!(provider.source(), ProviderSource::Tes);
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().all(|item| item.source() == ProviderSource::Tes));
        assert_eq!(op.submitted.lock()[0], request());
    }

    #[test]
    fn status_payload_maps_to_operation_status() {
        let failed: StatusResponse =
            serde_json::from_str(r#"{"status":"FAILED"}"#).unwrap();
        assert_eq!(
            OperationStatus::from(failed),
            OperationStatus::Failed("unspecified failure".into())
        );
        let done: StatusResponse = serde_json::from_str(
            r#"{"status":"COMPLETED","suggestions":[{"street":"Main","score":0.8}]}"#,
        )
        .unwrap();
        assert!(matches!(OperationStatus::from(done), OperationStatus::Completed(items) if items[0].score == Some(0.8)));
        assert!(serde_json::from_str::<StatusResponse>(r#"{"status":"LOST"}"#).is_err());
    }

    #[test]
    fn rejects_blank_endpoint() {
        assert!(matches!(HttpTesClient::new("  /", None), Err(AppError::Config(_))));
    }
}
