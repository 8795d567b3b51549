pub mod address;
pub mod budget;
pub mod config;
pub mod country;
pub mod debounce;
pub mod equality;
pub mod errors;
pub mod generation;
pub mod geocode;
pub mod history;
pub mod merge;
pub mod queue;
pub mod ranking;
pub mod retry;
pub mod runtime;
pub mod save;
pub mod session;
pub mod settings;
pub mod stale;
pub mod suggestion;
pub mod tes;
pub mod validation;
pub mod verifier;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::address::{normalize, AddressFragment, CanonicalAddress};
pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::geocode::{GeocodeProvider, GeocodeResult};
pub use crate::history::{Side, Snapshot};
pub use crate::runtime::{ProviderRuntime, RuntimeHealth};
pub use crate::save::{SaveOutcome, Saver};
pub use crate::session::EditSession;
pub use crate::settings::{RuntimeSettings, UpdateRuntimeSettingsPayload};
pub use crate::suggestion::{ProviderSource, Suggestion, SuggestionProvider};
pub use crate::validation::{validate, ValidationResult};
pub use crate::verifier::{Verification, Verifier, VerifyOutcome};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHealth {
    pub runtime: RuntimeHealth,
    pub settings: RuntimeSettings,
    pub queue_size: usize,
    pub cached_geocodes: usize,
}

/// Bootstrap-owned pipeline: the provider runtime and the verifier built on it.
pub struct AppState {
    runtime: ProviderRuntime,
    verifier: Verifier,
}

impl AppState {
    /// Reads configuration from the environment and wires `geocoder` plus any
    /// configured TES endpoint.
    pub fn initialize(geocoder: Arc<dyn GeocodeProvider>) -> AppResult<Self> {
        init_tracing();
        let config = AppConfig::from_env();
        Self::with_runtime(ProviderRuntime::from_config(config).with_geocoder(geocoder))
    }

    pub fn with_runtime(runtime: ProviderRuntime) -> AppResult<Self> {
        let verifier = Verifier::new(&runtime)?;
        info!(
            config = ?runtime.config().public_profile(),
            "address verification pipeline ready"
        );
        Ok(Self { runtime, verifier })
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn runtime(&self) -> &ProviderRuntime {
        &self.runtime
    }

    pub fn edit_session(&self, saver: Arc<dyn Saver>) -> EditSession {
        EditSession::new(saver, self.runtime.config().undo_capacity)
            .with_registry(self.verifier.registry().clone())
    }

    pub fn health(&self) -> PipelineHealth {
        PipelineHealth {
            runtime: self.runtime.health(),
            settings: self.verifier.settings(),
            queue_size: self.verifier.queue().size(),
            cached_geocodes: self.verifier.geocoder().cache_len(),
        }
    }
}

/// Installs the global tracing subscriber once per process.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,address_verifier=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
