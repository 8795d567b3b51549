use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::address::{normalize_with, AddressFragment, CanonicalAddress};
use crate::budget::{run_with_timeout, Budgeted, Outcome};
use crate::config::AppConfig;
use crate::country::CountryRegistry;
use crate::debounce::DebouncedExecutor;
use crate::errors::AppResult;
use crate::geocode::{GeocodeResult, GeocodeService};
use crate::merge::merge;
use crate::queue::ConcurrencyQueue;
use crate::ranking::rank;
use crate::retry::{QuotaBackoff, RetryPolicy};
use crate::runtime::ProviderRuntime;
use crate::settings::{RuntimeSettings, UpdateRuntimeSettingsPayload};
use crate::stale::StaleResultGuard;
use crate::suggestion::{from_geocoder, ProviderSource, RawSuggestion, Suggestion, SuggestionProvider};
use crate::validation::{validate_with, ValidationResult};

const VERIFY_KEY: &str = "verify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTiming {
    pub source: ProviderSource,
    pub timed_out: bool,
    pub failed: bool,
    pub elapsed_ms: u64,
}

impl ProviderTiming {
    fn of<T>(source: ProviderSource, budgeted: &Budgeted<T>) -> Self {
        Self {
            source,
            timed_out: budgeted.timed_out(),
            failed: budgeted.failed(),
            elapsed_ms: budgeted.elapsed_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub input: CanonicalAddress,
    /// Geocode of the input itself, for the map collaborator.
    pub instant: Option<GeocodeResult>,
    pub suggestions: Vec<Suggestion>,
    pub elapsed_ms: u64,
    pub timings: Vec<ProviderTiming>,
}

#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Verified(Verification),
    Invalid(ValidationResult),
    /// A newer call or an invalidation replaced this one.
    Superseded,
}

impl VerifyOutcome {
    pub fn verification(&self) -> Option<&Verification> {
        match self {
            VerifyOutcome::Verified(verification) => Some(verification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Budgets {
    geocode: Duration,
    places: Duration,
    tes: Duration,
}

impl Budgets {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            geocode: Duration::from_millis(config.geocode_budget_ms),
            places: Duration::from_millis(config.places_budget_ms),
            tes: Duration::from_millis(config.tes_budget_ms),
        }
    }
}

/// Normalize, validate, debounce, look up and rank in one call.
pub struct Verifier {
    registry: CountryRegistry,
    geocoder: Arc<GeocodeService>,
    places: Option<Arc<dyn SuggestionProvider>>,
    tes: Option<Arc<dyn SuggestionProvider>>,
    debounce: DebouncedExecutor,
    stale: StaleResultGuard<&'static str>,
    queue: ConcurrencyQueue,
    budgets: Budgets,
    settings: Mutex<RuntimeSettings>,
}

impl Verifier {
    /// Fails with `AppError::Config` when the runtime has no usable geocoder.
    pub fn new(runtime: &ProviderRuntime) -> AppResult<Self> {
        let config = runtime.config();
        let geocoder = runtime.geocoder()?;
        let settings = RuntimeSettings::from_config(config);
        let queue = ConcurrencyQueue::new(settings.queue_concurrency);
        let backoff = QuotaBackoff::new(RetryPolicy::from_config(config));

        Ok(Self {
            registry: CountryRegistry::with_default_country(&config.default_country),
            geocoder: Arc::new(GeocodeService::new(geocoder, backoff, queue.clone())),
            places: runtime.places(),
            tes: runtime.tes(),
            debounce: DebouncedExecutor::new(Duration::from_millis(settings.debounce_ms)),
            stale: StaleResultGuard::new(),
            queue,
            budgets: Budgets::from_config(config),
            settings: Mutex::new(settings),
        })
    }

    pub fn normalize(&self, fragment: &AddressFragment) -> CanonicalAddress {
        normalize_with(fragment, &self.registry)
    }

    pub fn validate(&self, address: &CanonicalAddress) -> ValidationResult {
        validate_with(address, &self.registry)
    }

    /// Geocode plus configured places lookup, each under its latency budget,
    /// merged and ranked.
    pub async fn verify(&self, fragment: &AddressFragment) -> VerifyOutcome {
        self.gated(fragment, |input| self.lookup(input)).await
    }

    /// Races geocode, places and TES, each under its own latency budget.
    pub async fn verify_within_budget(&self, fragment: &AddressFragment) -> VerifyOutcome {
        self.gated(fragment, |input| self.lookup_within_budget(input)).await
    }

    /// Voids any pending or in-flight verification.
    pub fn invalidate(&self) {
        self.debounce.cancel();
        self.stale.invalidate(&VERIFY_KEY);
    }

    pub fn update_settings(&self, payload: UpdateRuntimeSettingsPayload) -> RuntimeSettings {
        let payload = payload.sanitized();
        let updated = {
            let mut settings = self.settings.lock();
            settings.apply_patch(&payload);
            *settings
        };
        self.queue.set_concurrency(updated.queue_concurrency);
        self.debounce.set_delay(Duration::from_millis(updated.debounce_ms));
        info!(
            queue_concurrency = updated.queue_concurrency,
            debounce_ms = updated.debounce_ms,
            "runtime settings updated"
        );
        updated
    }

    pub fn settings(&self) -> RuntimeSettings {
        *self.settings.lock()
    }

    pub fn registry(&self) -> &CountryRegistry {
        &self.registry
    }

    pub fn geocoder(&self) -> &GeocodeService {
        &self.geocoder
    }

    pub fn queue(&self) -> &ConcurrencyQueue {
        &self.queue
    }

    async fn gated<F, Fut>(&self, fragment: &AddressFragment, lookup: F) -> VerifyOutcome
    where
        F: FnOnce(CanonicalAddress) -> Fut,
        Fut: Future<Output = Verification>,
    {
        let input = self.normalize(fragment);
        let validation = self.validate(&input);
        if !validation.valid {
            debug!(errors = validation.errors.len(), "verification blocked by validation");
            self.invalidate();
            return VerifyOutcome::Invalid(validation);
        }

        let result = self
            .debounce
            .run(|| self.stale.run(VERIFY_KEY, || lookup(input)))
            .await;
        match result.flatten() {
            Some(verification) => VerifyOutcome::Verified(verification),
            None => VerifyOutcome::Superseded,
        }
    }

    async fn lookup(&self, input: CanonicalAddress) -> Verification {
        self.budgeted_lookup(input, None).await
    }

    async fn lookup_within_budget(&self, input: CanonicalAddress) -> Verification {
        self.budgeted_lookup(input, self.tes.as_ref()).await
    }

    async fn budgeted_lookup(
        &self,
        input: CanonicalAddress,
        tes: Option<&Arc<dyn SuggestionProvider>>,
    ) -> Verification {
        let started = Instant::now();
        let free_text = input.free_text();

        let geocode = {
            let service = Arc::clone(&self.geocoder);
            let address = input.clone();
            run_with_timeout(
                move || async move { service.try_geocode(&address).await },
                self.budgets.geocode,
                None,
            )
        };
        let places = budgeted_suggestions(self.places.as_ref(), self.budgets.places, &free_text, &input);
        let tes = budgeted_suggestions(tes, self.budgets.tes, &free_text, &input);
        let (geocode, places, tes) = tokio::join!(geocode, places, tes);

        let mut timings = vec![ProviderTiming::of(ProviderSource::GoogleClient, &geocode)];
        let instant = settle("geocoder", geocode, None);
        let mut lists = Vec::new();
        for (source, budgeted) in [(ProviderSource::GooglePlaces, places), (ProviderSource::Tes, tes)] {
            if let Some(budgeted) = budgeted {
                timings.push(ProviderTiming::of(source, &budgeted));
                lists.push(settle(source.as_str(), budgeted, Vec::new()));
            }
        }

        finish(input, instant, lists, timings, started)
    }
}

/// Runs the provider on its own task under `budget`, outside the bulk queue.
async fn budgeted_suggestions(
    provider: Option<&Arc<dyn SuggestionProvider>>,
    budget: Duration,
    free_text: &str,
    input: &CanonicalAddress,
) -> Option<Budgeted<Vec<Suggestion>>> {
    let provider = Arc::clone(provider?);
    let free_text = free_text.to_string();
    let country = input.country.clone();
    Some(
        run_with_timeout(
            move || collect_suggestions(provider, free_text, country),
            budget,
            Vec::new(),
        )
        .await,
    )
}

async fn collect_suggestions(
    provider: Arc<dyn SuggestionProvider>,
    free_text: String,
    country: String,
) -> AppResult<Vec<Suggestion>> {
    let raw = provider.suggest(&free_text, &country).await?;
    Ok(raw
        .into_iter()
        .filter_map(RawSuggestion::into_suggestion)
        .collect())
}

fn settle<T>(provider: &str, budgeted: Budgeted<T>, fallback: T) -> T {
    if let Outcome::Failed(err) = &budgeted.outcome {
        warn!(?err, provider, "provider failed; continuing without its results");
    }
    budgeted.into_value(fallback)
}

/// The input's own geocode leads the merge so it wins deduplication.
fn finish(
    input: CanonicalAddress,
    instant: Option<GeocodeResult>,
    provider_lists: Vec<Vec<Suggestion>>,
    timings: Vec<ProviderTiming>,
    started: Instant,
) -> Verification {
    let mut lists = Vec::with_capacity(provider_lists.len() + 1);
    if let Some(hit) = instant.as_ref().and_then(from_geocoder) {
        lists.push(vec![hit]);
    }
    lists.extend(provider_lists);
    let suggestions = rank(&input, merge(&input, lists));
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(count = suggestions.len(), elapsed_ms, "verification settled");

    Verification {
        input,
        instant,
        suggestions,
        elapsed_ms,
        timings,
    }
}
