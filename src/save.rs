use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::equality::{equals, hash};
use crate::errors::AppResult;
use crate::history::{Side, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub order_id: String,
    pub side: Side,
    pub resolution: String,
    pub before: Snapshot,
    pub after: Snapshot,
}

impl SavePayload {
    /// Deterministic token for this logical save. Two payloads with equal
    /// addresses (per `equals`) yield the same key.
    pub fn idempotency_key(&self) -> String {
        let hashes = [
            hash(&self.before.pickup),
            hash(&self.before.delivery),
            hash(&self.after.pickup),
            hash(&self.after.delivery),
        ];
        let mut hasher = Sha256::new();
        let parts = [self.order_id.as_str(), self.side.as_str(), self.resolution.as_str()];
        for part in parts.into_iter().chain(hashes.iter().map(String::as_str)) {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    pub fn has_changes(&self) -> bool {
        !equals(&self.before.pickup, &self.after.pickup)
            || !equals(&self.before.delivery, &self.after.delivery)
    }
}

#[async_trait]
pub trait Saver: Send + Sync {
    async fn save(&self, payload: &SavePayload) -> AppResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Duplicate,
    NoChanges,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Skipped(SkipReason),
    Saved(Value),
}

impl SaveOutcome {
    pub fn skipped(&self) -> bool {
        matches!(self, SaveOutcome::Skipped(_))
    }
}

/// Suppresses duplicate and no-op saves. Saves are serialized so a double
/// invocation observes the first one's key.
pub struct SaveGuard {
    saver: Arc<dyn Saver>,
    last_key: Mutex<Option<String>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl SaveGuard {
    pub fn new(saver: Arc<dyn Saver>) -> Self {
        Self {
            saver,
            last_key: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn save_if_changed(&self, payload: &SavePayload) -> AppResult<SaveOutcome> {
        let _guard = self.in_flight.lock().await;
        let key = payload.idempotency_key();

        if self.last_key.lock().as_deref() == Some(key.as_str()) {
            debug!(order_id = %payload.order_id, "skipping duplicate save");
            return Ok(SaveOutcome::Skipped(SkipReason::Duplicate));
        }
        if !payload.has_changes() {
            debug!(order_id = %payload.order_id, "skipping save without changes");
            return Ok(SaveOutcome::Skipped(SkipReason::NoChanges));
        }

        match self.saver.save(payload).await {
            Ok(value) => {
                *self.last_key.lock() = Some(key);
                info!(
                    order_id = %payload.order_id,
                    side = payload.side.as_str(),
                    "address correction saved"
                );
                Ok(SaveOutcome::Saved(value))
            }
            Err(err) => {
                warn!(?err, order_id = %payload.order_id, "save failed; key not recorded");
                Err(err)
            }
        }
    }

    pub fn last_key(&self) -> Option<String> {
        self.last_key.lock().clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::address::CanonicalAddress;
    use crate::errors::AppError;

    pub(crate) struct RecordingSaver {
        pub(crate) calls: AtomicUsize,
        failures: Mutex<usize>,
        delay: Duration,
    }

    impl RecordingSaver {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures: Mutex::new(0),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(times: usize) -> Self {
            Self {
                failures: Mutex::new(times),
                ..Self::new()
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Saver for RecordingSaver {
        async fn save(&self, payload: &SavePayload) -> AppResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(AppError::Save("backend unavailable".into()));
                }
            }
            Ok(json!({ "orderId": payload.order_id, "revision": call }))
        }
    }

    fn address(city: &str) -> CanonicalAddress {
        CanonicalAddress {
            street: "Main".into(),
            house_number: "10".into(),
            postal_code: "00-123".into(),
            city: city.into(),
            country: "PL".into(),
            latitude: None,
            longitude: None,
        }
    }

    fn payload(after_city: &str) -> SavePayload {
        let before = Snapshot::new(address("Warsaw"), address("Gdańsk"));
        let after = before.with_side(Side::Pickup, address(after_city));
        SavePayload {
            order_id: "order-1".into(),
            side: Side::Pickup,
            resolution: "accepted".into(),
            before,
            after,
        }
    }

    #[tokio::test]
    async fn identical_payload_twice_is_a_duplicate() {
        let saver = Arc::new(RecordingSaver::new());
        let guard = SaveGuard::new(saver.clone());

        let first = guard.save_if_changed(&payload("Kraków")).await.unwrap();
        let second = guard.save_if_changed(&payload("Kraków")).await.unwrap();

        assert!(matches!(first, SaveOutcome::Saved(_)));
        assert_eq!(second, SaveOutcome::Skipped(SkipReason::Duplicate));
        assert_eq!(saver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unchanged_payload_is_skipped() {
        let saver = Arc::new(RecordingSaver::new());
        let guard = SaveGuard::new(saver.clone());
        let outcome = guard.save_if_changed(&payload(" warsaw ")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::NoChanges));
        assert_eq!(saver.calls.load(Ordering::SeqCst), 0);
        assert!(guard.last_key().is_none());
    }

    #[tokio::test]
    async fn failed_save_stays_retryable() {
        let saver = Arc::new(RecordingSaver::failing(1));
        let guard = SaveGuard::new(saver.clone());

        assert!(guard.save_if_changed(&payload("Kraków")).await.is_err());
        assert!(guard.last_key().is_none());
        let retried = guard.save_if_changed(&payload("Kraków")).await.unwrap();
        assert!(!retried.skipped());
        assert_eq!(saver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_double_invocation_saves_once() {
        let saver = Arc::new(RecordingSaver::new().with_delay(Duration::from_millis(100)));
        let guard = SaveGuard::new(saver.clone());
        let request = payload("Kraków");

        let (first, second) = tokio::join!(
            guard.save_if_changed(&request),
            guard.save_if_changed(&request)
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.skipped()).count(), 1);
        assert_eq!(saver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_depends_on_every_component() {
        let base = payload("Kraków");
        let mut other_side = base.clone();
        other_side.side = Side::Both;
        let mut other_resolution = base.clone();
        other_resolution.resolution = "manual".into();

        assert_eq!(base.idempotency_key(), payload("KRAKÓW").idempotency_key());
        assert_ne!(base.idempotency_key(), other_side.idempotency_key());
        assert_ne!(base.idempotency_key(), other_resolution.idempotency_key());
        assert_ne!(base.idempotency_key(), payload("Poznań").idempotency_key());
        assert_eq!(base.idempotency_key().len(), 43);
    }
}
