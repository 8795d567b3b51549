use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::country::FALLBACK_COUNTRY;
use crate::history::DEFAULT_UNDO_CAPACITY;
use crate::queue::DEFAULT_CONCURRENCY;

const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub debounce_ms: u64,
    pub queue_concurrency: usize,
    pub geocode_budget_ms: u64,
    pub places_budget_ms: u64,
    pub tes_budget_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_jitter_ms: u64,
    pub undo_capacity: usize,
    pub default_country: String,
    pub tes_endpoint: Option<String>,
    pub tes_api_key: Option<SecretString>,
    pub tes_poll_interval_ms: u64,
    pub tes_max_polls: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub debounce_ms: u64,
    pub queue_concurrency: usize,
    pub geocode_budget_ms: u64,
    pub places_budget_ms: u64,
    pub tes_budget_ms: u64,
    pub retry_max_attempts: u32,
    pub undo_capacity: usize,
    pub default_country: String,
    pub tes_endpoint: Option<String>,
    pub has_tes_api_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            queue_concurrency: DEFAULT_CONCURRENCY,
            geocode_budget_ms: 1_500,
            places_budget_ms: 1_200,
            tes_budget_ms: 4_000,
            retry_max_attempts: 3,
            retry_base_ms: 500,
            retry_jitter_ms: 200,
            undo_capacity: DEFAULT_UNDO_CAPACITY,
            default_country: FALLBACK_COUNTRY.to_string(),
            tes_endpoint: None,
            tes_api_key: None,
            tes_poll_interval_ms: 1_000,
            tes_max_polls: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            debounce_ms: parse_u64("VERIFY_DEBOUNCE_MS", defaults.debounce_ms),
            queue_concurrency: parse_usize("VERIFY_QUEUE_CONCURRENCY", defaults.queue_concurrency)
                .max(1),
            geocode_budget_ms: parse_u64("GEOCODE_BUDGET_MS", defaults.geocode_budget_ms),
            places_budget_ms: parse_u64("PLACES_BUDGET_MS", defaults.places_budget_ms),
            tes_budget_ms: parse_u64("TES_BUDGET_MS", defaults.tes_budget_ms),
            retry_max_attempts: parse_u32("GEOCODE_RETRY_ATTEMPTS", defaults.retry_max_attempts)
                .max(1),
            retry_base_ms: parse_u64("GEOCODE_RETRY_BASE_MS", defaults.retry_base_ms),
            retry_jitter_ms: parse_u64("GEOCODE_RETRY_JITTER_MS", defaults.retry_jitter_ms),
            undo_capacity: parse_usize("UNDO_CAPACITY", defaults.undo_capacity).max(1),
            default_country: env::var("DEFAULT_COUNTRY")
                .ok()
                .map(|v| v.trim().to_ascii_uppercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.default_country),
            tes_endpoint: env::var("TES_ENDPOINT")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            tes_api_key: env::var("TES_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            tes_poll_interval_ms: parse_u64("TES_POLL_INTERVAL_MS", defaults.tes_poll_interval_ms),
            tes_max_polls: parse_u32("TES_MAX_POLLS", defaults.tes_max_polls).max(1),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            debounce_ms: self.debounce_ms,
            queue_concurrency: self.queue_concurrency,
            geocode_budget_ms: self.geocode_budget_ms,
            places_budget_ms: self.places_budget_ms,
            tes_budget_ms: self.tes_budget_ms,
            retry_max_attempts: self.retry_max_attempts,
            undo_capacity: self.undo_capacity,
            default_country: self.default_country.clone(),
            tes_endpoint: self.tes_endpoint.clone(),
            has_tes_api_key: self.tes_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("TES_API_KEY", "secret");
        env::set_var("TES_ENDPOINT", "https://tes.example.com/api/");
        env::set_var("UNDO_CAPACITY", "75");
        env::set_var("DEFAULT_COUNTRY", " de ");
        env::set_var("VERIFY_QUEUE_CONCURRENCY", "0");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.undo_capacity, 75);
        assert_eq!(public.default_country, "DE");
        assert_eq!(public.queue_concurrency, 1);
        assert_eq!(public.tes_endpoint.as_deref(), Some("https://tes.example.com/api"));
        assert!(public.has_tes_api_key);
        assert!(config.tes_api_key.is_some());
        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("secret"));
        assert_eq!(public.debounce_ms, DEFAULT_DEBOUNCE_MS);
    }
}
