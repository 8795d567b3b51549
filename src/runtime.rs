use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AppConfig, PublicAppConfig};
use crate::errors::{AppError, AppResult};
use crate::geocode::GeocodeProvider;
use crate::suggestion::SuggestionProvider;
use crate::tes::{HttpTesClient, PollPolicy, TesSuggestionProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    Geocoder,
    Places,
    Tes,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Geocoder => "geocoder",
            ProviderKind::Places => "places",
            ProviderKind::Tes => "tes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum LoadState {
    Unconfigured,
    Ready,
    Failed(String),
}

struct ProviderSlot<P: ?Sized> {
    provider: Option<Arc<P>>,
    state: LoadState,
}

impl<P: ?Sized> ProviderSlot<P> {
    fn empty() -> Self {
        Self {
            provider: None,
            state: LoadState::Unconfigured,
        }
    }

    fn ready(provider: Arc<P>) -> Self {
        Self {
            provider: Some(provider),
            state: LoadState::Ready,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            provider: None,
            state: LoadState::Failed(reason),
        }
    }

    fn available(&self) -> Option<Arc<P>> {
        match self.state {
            LoadState::Ready => self.provider.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    #[serde(flatten)]
    pub state: LoadState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeHealth {
    pub providers: Vec<ProviderHealth>,
    pub config: PublicAppConfig,
}

impl RuntimeHealth {
    pub fn state_of(&self, kind: ProviderKind) -> Option<&LoadState> {
        self.providers
            .iter()
            .find(|health| health.provider == kind)
            .map(|health| &health.state)
    }
}

/// Owns the configured providers and their load state. Built once at
/// bootstrap and handed to the verifier.
pub struct ProviderRuntime {
    config: AppConfig,
    geocoder: ProviderSlot<dyn GeocodeProvider>,
    places: ProviderSlot<dyn SuggestionProvider>,
    tes: ProviderSlot<dyn SuggestionProvider>,
}

impl ProviderRuntime {
    /// Wires the HTTP TES adapter when an endpoint is configured. A broken
    /// adapter is recorded as failed rather than aborting bootstrap.
    pub fn from_config(config: AppConfig) -> Self {
        let tes = match HttpTesClient::maybe_new(&config) {
            Ok(Some(client)) => {
                info!(endpoint = client.endpoint(), "TES adapter ready");
                let provider: Arc<dyn SuggestionProvider> = Arc::new(TesSuggestionProvider::new(
                    Arc::new(client),
                    PollPolicy::from_config(&config),
                ));
                ProviderSlot::ready(provider)
            }
            Ok(None) => ProviderSlot::empty(),
            Err(err) => {
                warn!(?err, "TES adapter failed to initialize");
                ProviderSlot::failed(err.to_string())
            }
        };
        Self {
            config,
            geocoder: ProviderSlot::empty(),
            places: ProviderSlot::empty(),
            tes,
        }
    }

    pub fn with_geocoder(mut self, provider: Arc<dyn GeocodeProvider>) -> Self {
        self.geocoder = ProviderSlot::ready(provider);
        self
    }

    pub fn with_places(mut self, provider: Arc<dyn SuggestionProvider>) -> Self {
        self.places = ProviderSlot::ready(provider);
        self
    }

    pub fn with_tes(mut self, provider: Arc<dyn SuggestionProvider>) -> Self {
        self.tes = ProviderSlot::ready(provider);
        self
    }

    /// Records a provider that failed to load; it is no longer handed out.
    pub fn mark_failed(&mut self, kind: ProviderKind, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(provider = kind.as_str(), reason = %reason, "provider marked as failed");
        match kind {
            ProviderKind::Geocoder => self.geocoder = ProviderSlot::failed(reason),
            ProviderKind::Places => self.places = ProviderSlot::failed(reason),
            ProviderKind::Tes => self.tes = ProviderSlot::failed(reason),
        }
    }

    pub fn geocoder(&self) -> AppResult<Arc<dyn GeocodeProvider>> {
        self.geocoder.available().ok_or_else(|| match &self.geocoder.state {
            LoadState::Failed(reason) => {
                AppError::Config(format!("geocoder failed to load: {reason}"))
            }
            _ => AppError::Config("no geocoder configured".into()),
        })
    }

    pub fn places(&self) -> Option<Arc<dyn SuggestionProvider>> {
        self.places.available()
    }

    pub fn tes(&self) -> Option<Arc<dyn SuggestionProvider>> {
        self.tes.available()
    }

    pub fn state(&self, kind: ProviderKind) -> &LoadState {
        match kind {
            ProviderKind::Geocoder => &self.geocoder.state,
            ProviderKind::Places => &self.places.state,
            ProviderKind::Tes => &self.tes.state,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn health(&self) -> RuntimeHealth {
        let providers = [ProviderKind::Geocoder, ProviderKind::Places, ProviderKind::Tes]
            .into_iter()
            .map(|kind| ProviderHealth {
                provider: kind,
                state: self.state(kind).clone(),
            })
            .collect();
        RuntimeHealth {
            providers,
            config: self.config.public_profile(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::geocode::tests::ScriptedGeocoder;

    #[test]
    fn empty_runtime_reports_unconfigured() {
        let runtime = ProviderRuntime::from_config(AppConfig::default());
        let health = runtime.health();
        assert_eq!(health.providers.len(), 3);
        assert!(health
            .providers
            .iter()
            .all(|provider| provider.state == LoadState::Unconfigured));
        assert!(matches!(runtime.geocoder(), Err(AppError::Config(_))));
        assert!(runtime.places().is_none());
    }

    #[test]
    fn configured_endpoint_wires_tes() {
        let config = AppConfig {
            tes_endpoint: Some("https://tes.example.com".into()),
            ..AppConfig::default()
        };
        let runtime = ProviderRuntime::from_config(config);
        assert!(runtime.tes().is_some());
        assert_eq!(runtime.state(ProviderKind::Tes), &LoadState::Ready);
    }

    #[test]
    fn broken_endpoint_is_recorded_as_failed() {
        let config = AppConfig {
            tes_endpoint: Some("/".into()),
            ..AppConfig::default()
        };
        let runtime = ProviderRuntime::from_config(config);
        assert!(runtime.tes().is_none());
        assert!(matches!(runtime.state(ProviderKind::Tes), LoadState::Failed(_)));
    }

    #[test]
    fn failed_geocoder_is_not_handed_out() {
        let mut runtime = ProviderRuntime::from_config(AppConfig::default())
            .with_geocoder(Arc::new(ScriptedGeocoder::new(vec![])));
        assert!(runtime.geocoder().is_ok());

        runtime.mark_failed(ProviderKind::Geocoder, "script blocked");
        let err = runtime.geocoder().err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("geocoder failed to load: script blocked"));

        let health = serde_json::to_value(runtime.health()).unwrap();
        assert_eq!(
            health["providers"][0],
            json!({ "provider": "geocoder", "state": "failed", "reason": "script blocked" })
        );
        assert_eq!(health["config"]["has_tes_api_key"], json!(false));
    }
}
