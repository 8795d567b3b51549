use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::address::CanonicalAddress;
use crate::equality::{hash, identity_key};
use crate::errors::AppResult;
use crate::queue::ConcurrencyQueue;
use crate::retry::QuotaBackoff;
use crate::suggestion::{AddressComponents, MatchLevel};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeocodeResult {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: Option<String>,
    pub components: AddressComponents,
    pub match_level: MatchLevel,
}

impl GeocodeResult {
    /// Both coordinates present and finite; only these are cached.
    pub fn is_complete(&self) -> bool {
        matches!((self.latitude, self.longitude), (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite())
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn geocode_address(&self, address: &CanonicalAddress) -> AppResult<Option<GeocodeResult>>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    identity: String,
    result: GeocodeResult,
}

/// Session-scoped memo of successful geocodes keyed by the address hash.
#[derive(Debug, Default)]
pub struct GeocodeCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &CanonicalAddress) -> Option<GeocodeResult> {
        let key = hash(address);
        let entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if entry.identity != identity_key(address) {
            debug!(key = %key, "geocode cache hash collision; treating as miss");
            return None;
        }
        Some(entry.result.clone())
    }

    /// Stores `result` if it carries finite coordinates. Returns whether it was stored.
    pub fn insert(&self, address: &CanonicalAddress, result: &GeocodeResult) -> bool {
        if !result.is_complete() {
            return false;
        }
        self.entries.lock().insert(
            hash(address),
            CacheEntry {
                identity: identity_key(address),
                result: result.clone(),
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Cached, quota-aware geocoding. Bulk lookups are admitted through the
/// concurrency queue; single lookups call the provider directly.
pub struct GeocodeService {
    provider: Arc<dyn GeocodeProvider>,
    cache: GeocodeCache,
    backoff: QuotaBackoff,
    queue: ConcurrencyQueue,
}

impl GeocodeService {
    pub fn new(
        provider: Arc<dyn GeocodeProvider>,
        backoff: QuotaBackoff,
        queue: ConcurrencyQueue,
    ) -> Self {
        Self {
            provider,
            cache: GeocodeCache::new(),
            backoff,
            queue,
        }
    }

    pub async fn try_geocode(&self, address: &CanonicalAddress) -> AppResult<Option<GeocodeResult>> {
        if let Some(hit) = self.cache.get(address) {
            trace!(key = %hash(address), "geocode cache hit");
            return Ok(Some(hit));
        }

        let provider = &self.provider;
        let result = self
            .backoff
            .run(move || provider.geocode_address(address))
            .await?;

        if let Some(found) = &result {
            if !self.cache.insert(address, found) {
                trace!(key = %hash(address), "partial geocode not cached");
            }
        }
        Ok(result)
    }

    /// Like `try_geocode`, degrading provider failures to no result.
    pub async fn geocode(&self, address: &CanonicalAddress) -> Option<GeocodeResult> {
        match self.try_geocode(address).await {
            Ok(result) => result,
            Err(err) => {
                warn!(?err, "geocode failed; continuing without a result");
                None
            }
        }
    }

    pub async fn geocode_many(&self, addresses: &[CanonicalAddress]) -> Vec<Option<GeocodeResult>> {
        join_all(
            addresses
                .iter()
                .map(|address| self.queue.enqueue(move || self.geocode(address))),
        )
        .await
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub fn queue(&self) -> &ConcurrencyQueue {
        &self.queue
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::errors::AppError;
    use crate::retry::RetryPolicy;

    /// Scripted geocoder: pops queued responses, then answers with a fixed point.
    pub(crate) struct ScriptedGeocoder {
        responses: Mutex<Vec<AppResult<Option<GeocodeResult>>>>,
        pub(crate) calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedGeocoder {
        pub(crate) fn new(responses: Vec<AppResult<Option<GeocodeResult>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    pub(crate) fn point(lat: f64, lng: f64) -> GeocodeResult {
        GeocodeResult {
            latitude: Some(lat),
            longitude: Some(lng),
            formatted_address: Some(format!("{lat},{lng}")),
            components: AddressComponents::default(),
            match_level: MatchLevel::HouseNumber,
        }
    }

    #[async_trait]
    impl GeocodeProvider for ScriptedGeocoder {
        async fn geocode_address(&self, address: &CanonicalAddress) -> AppResult<Option<GeocodeResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.responses.lock().pop();
            scripted.unwrap_or_else(|| {
                let mut result = point(52.23, 21.01);
                result.components.street = Some(address.street.clone());
                result.components.city = Some(address.city.clone());
                Ok(Some(result))
            })
        }
    }

    pub(crate) fn service(provider: Arc<dyn GeocodeProvider>) -> GeocodeService {
        GeocodeService::new(
            provider,
            QuotaBackoff::with_rng(RetryPolicy::default(), StdRng::seed_from_u64(11)),
            ConcurrencyQueue::new(2),
        )
    }

    fn warsaw() -> CanonicalAddress {
        CanonicalAddress {
            street: "Main".into(),
            house_number: "10".into(),
            postal_code: "00-123".into(),
            city: "Warsaw".into(),
            country: "PL".into(),
            latitude: None,
            longitude: None,
        }
    }

    #[tokio::test]
    async fn second_lookup_is_a_cache_hit() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![]));
        let service = service(geocoder.clone());

        let first = service.geocode(&warsaw()).await;
        let mut same = warsaw();
        same.city = "  WARSAW ".into();
        let second = service.geocode(&same).await;

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache_len(), 1);

        service.clear_cache();
        assert!(service.geocode(&warsaw()).await.is_some());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_results_are_not_cached() {
        let partial = GeocodeResult {
            latitude: Some(52.0),
            longitude: None,
            ..GeocodeResult::default()
        };
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![Ok(None), Ok(Some(partial))]));
        let service = service(geocoder.clone());

        let first = service.geocode(&warsaw()).await;
        assert_eq!(first.and_then(|r| r.longitude), None);
        assert!(service.geocode(&warsaw()).await.is_none());
        assert!(service.geocode(&warsaw()).await.is_some());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_errors_are_retried_before_caching() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![
            Ok(Some(point(1.0, 2.0))),
            Err(AppError::provider(Some(429), "slow down")),
        ]));
        let service = service(geocoder.clone());
        let result = service.try_geocode(&warsaw()).await.unwrap();
        assert_eq!(result, Some(point(1.0, 2.0)));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.cache().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_none() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![
            Err(AppError::provider(Some(500), "backend error")),
            Err(AppError::provider(Some(400), "REQUEST_DENIED")),
        ]));
        let service = service(geocoder.clone());
        assert!(service.try_geocode(&warsaw()).await.is_err());
        assert!(service.geocode(&warsaw()).await.is_none());
        assert!(service.cache().is_empty());
        assert!(service.geocode(&warsaw()).await.is_some());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_geocoding_respects_queue_bound() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![]).with_delay(Duration::from_millis(100)));
        let service = service(geocoder.clone());
        let addresses: Vec<CanonicalAddress> = (0..4)
            .map(|index| CanonicalAddress {
                house_number: index.to_string(),
                ..warsaw()
            })
            .collect();

        let started = tokio::time::Instant::now();
        let results = service.geocode_many(&addresses).await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(Option::is_some));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.queue().size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_lookup_bypasses_a_saturated_queue() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![]));
        let service = GeocodeService::new(
            geocoder.clone(),
            QuotaBackoff::with_rng(RetryPolicy::default(), StdRng::seed_from_u64(11)),
            ConcurrencyQueue::new(1),
        );
        let hold = service
            .queue()
            .enqueue(|| tokio::time::sleep(Duration::from_secs(3600)));
        tokio::pin!(hold);
        tokio::select! {
            () = &mut hold => panic!("held slot released early"),
            () = tokio::time::sleep(Duration::from_millis(1)) => {}
        }
        assert_eq!(service.queue().active(), 1);

        let result = tokio::time::timeout(Duration::from_millis(10), service.try_geocode(&warsaw())).await;
        assert!(matches!(result, Ok(Ok(Some(_)))));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_ignores_incomplete_results() {
        let cache = GeocodeCache::new();
        assert!(!cache.insert(&warsaw(), &GeocodeResult::default()));
        let mut nan = point(1.0, 2.0);
        nan.longitude = Some(f64::NAN);
        assert!(!cache.insert(&warsaw(), &nan));
        assert!(cache.insert(&warsaw(), &point(1.0, 2.0)));
        cache.clear();
        assert!(cache.get(&warsaw()).is_none());
    }
}
