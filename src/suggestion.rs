use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::{collapse_whitespace, AddressFragment};
use crate::errors::AppResult;
use crate::geocode::GeocodeResult;

/// Confidence priors by origin. Heuristic, not calibrated probabilities.
pub const GEOCODER_PRIOR: f64 = 0.95;
pub const PLACES_PRIOR: f64 = 0.90;
pub const TES_PRIOR: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderSource {
    GoogleClient,
    GooglePlaces,
    Tes,
    Other,
}

impl ProviderSource {
    pub fn priority(&self) -> u8 {
        match self {
            ProviderSource::GoogleClient => 3,
            ProviderSource::GooglePlaces => 2,
            ProviderSource::Tes => 1,
            ProviderSource::Other => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSource::GoogleClient => "GOOGLE_CLIENT",
            ProviderSource::GooglePlaces => "GOOGLE_PLACES",
            ProviderSource::Tes => "TES",
            ProviderSource::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchLevel {
    HouseNumber,
    Street,
    PostalCode,
    City,
    Country,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MatchLevel {
    /// Lenient parse for provider-supplied labels.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "HOUSE_NUMBER" | "HOUSENUMBER" | "BUILDING" | "ROOFTOP" | "EXACT" => {
                MatchLevel::HouseNumber
            }
            "STREET" | "ROUTE" => MatchLevel::Street,
            "POSTAL_CODE" | "POSTCODE" | "ZIP" => MatchLevel::PostalCode,
            "CITY" | "LOCALITY" => MatchLevel::City,
            "COUNTRY" => MatchLevel::Country,
            _ => MatchLevel::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub full_address_label: String,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub match_score: f64,
    pub match_level: MatchLevel,
    pub provider_source: ProviderSource,
}

impl Suggestion {
    /// Fragment carrying this suggestion's components, ready for normalization.
    pub fn to_fragment(&self) -> AddressFragment {
        AddressFragment {
            street: self.street.clone().unwrap_or_default(),
            house_number: self.house_number.clone().unwrap_or_default(),
            postal_code: self.postal_code.clone().unwrap_or_default(),
            city: self.city.clone().unwrap_or_default(),
            country: self.country_code.clone().unwrap_or_default(),
            latitude: self.latitude.map(|value| value.to_string()),
            longitude: self.longitude.map(|value| value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressComponents {
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

/// Places-style candidate: typed components plus an optional location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacesResult {
    pub place_id: Option<String>,
    pub formatted_address: Option<String>,
    pub address_components: Vec<PlacesComponent>,
    pub location: Option<LatLng>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlacesComponent {
    pub long_name: String,
    pub short_name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Flat candidate returned by the long-running (TES) lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TesResult {
    pub label: Option<String>,
    pub street: Option<String>,
    pub house_number: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub score: Option<f64>,
    pub match_level: Option<String>,
}

/// One raw item per provider shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSuggestion {
    Geocoder(GeocodeResult),
    Places(PlacesResult),
    Tes(TesResult),
}

impl RawSuggestion {
    pub fn source(&self) -> ProviderSource {
        match self {
            RawSuggestion::Geocoder(_) => ProviderSource::GoogleClient,
            RawSuggestion::Places(_) => ProviderSource::GooglePlaces,
            RawSuggestion::Tes(_) => ProviderSource::Tes,
        }
    }

    pub fn into_suggestion(self) -> Option<Suggestion> {
        match self {
            RawSuggestion::Geocoder(result) => from_geocoder(&result),
            RawSuggestion::Places(result) => from_places(&result),
            RawSuggestion::Tes(result) => from_tes(&result),
        }
    }
}

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    fn source(&self) -> ProviderSource;

    async fn suggest(&self, free_text: &str, country_code: &str) -> AppResult<Vec<RawSuggestion>>;
}

pub fn normalize_suggestion(raw: RawSuggestion) -> Option<Suggestion> {
    raw.into_suggestion()
}

pub fn from_geocoder(result: &GeocodeResult) -> Option<Suggestion> {
    build(
        result.formatted_address.as_deref(),
        &result.components,
        result.latitude,
        result.longitude,
        GEOCODER_PRIOR,
        result.match_level,
        ProviderSource::GoogleClient,
    )
}

pub fn from_places(result: &PlacesResult) -> Option<Suggestion> {
    let mut components = AddressComponents::default();
    for component in &result.address_components {
        let has = |kind: &str| component.types.iter().any(|t| t == kind);
        let long_name = non_empty(Some(component.long_name.as_str()));
        if has("route") {
            components.street = long_name;
        } else if has("street_number") {
            components.house_number = long_name;
        } else if has("postal_code") {
            components.postal_code = long_name;
        } else if has("locality") || (has("postal_town") && components.city.is_none()) {
            components.city = long_name;
        } else if has("country") {
            components.country_code = non_empty(Some(component.short_name.as_str()));
            components.country_name = long_name;
        }
    }
    let level = if components.house_number.is_some() {
        MatchLevel::HouseNumber
    } else if components.street.is_some() {
        MatchLevel::Street
    } else if components.postal_code.is_some() {
        MatchLevel::PostalCode
    } else if components.city.is_some() {
        MatchLevel::City
    } else {
        MatchLevel::Unknown
    };
    build(
        result.formatted_address.as_deref(),
        &components,
        result.location.map(|loc| loc.lat),
        result.location.map(|loc| loc.lng),
        PLACES_PRIOR,
        level,
        ProviderSource::GooglePlaces,
    )
}

pub fn from_tes(result: &TesResult) -> Option<Suggestion> {
    let components = AddressComponents {
        street: result.street.clone(),
        house_number: result.house_number.clone(),
        postal_code: result.postal_code.clone(),
        city: result.city.clone(),
        country_code: result.country_code.clone(),
        country_name: result.country_name.clone(),
    };
    let score = result
        .score
        .filter(|score| score.is_finite())
        .map(|score| score.clamp(0.0, 1.0))
        .unwrap_or(TES_PRIOR);
    let level = result
        .match_level
        .as_deref()
        .map(MatchLevel::parse)
        .unwrap_or_default();
    build(
        result.label.as_deref(),
        &components,
        result.latitude,
        result.longitude,
        score,
        level,
        ProviderSource::Tes,
    )
}

fn build(
    label: Option<&str>,
    components: &AddressComponents,
    latitude: Option<f64>,
    longitude: Option<f64>,
    match_score: f64,
    match_level: MatchLevel,
    provider_source: ProviderSource,
) -> Option<Suggestion> {
    let street = non_empty(components.street.as_deref());
    let house_number = non_empty(components.house_number.as_deref());
    let postal_code = non_empty(components.postal_code.as_deref());
    let city = non_empty(components.city.as_deref());
    let country_code = non_empty(components.country_code.as_deref()).map(|c| c.to_uppercase());
    let country_name = non_empty(components.country_name.as_deref());

    let label = non_empty(label).unwrap_or_else(|| {
        compose_label(&[
            street.as_deref(),
            house_number.as_deref(),
            postal_code.as_deref(),
            city.as_deref(),
            country_name.as_deref().or(country_code.as_deref()),
        ])
    });
    if label.is_empty() {
        return None;
    }

    Some(Suggestion {
        full_address_label: label,
        street,
        house_number,
        postal_code,
        city,
        country_code,
        country_name,
        latitude: latitude.filter(|v| v.is_finite()),
        longitude: longitude.filter(|v| v.is_finite()),
        match_score,
        match_level,
        provider_source,
    })
}

fn compose_label(parts: &[Option<&str>; 5]) -> String {
    let [street, house, postal, city, country] = *parts;
    let street_line = join(&[street, house], " ");
    let city_line = join(&[postal, city], " ");
    join(
        &[
            non_empty(Some(street_line.as_str())).as_deref(),
            non_empty(Some(city_line.as_str())).as_deref(),
            country,
        ],
        ", ",
    )
}

fn join(parts: &[Option<&str>], separator: &str) -> String {
    parts
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(separator)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|value| !value.is_empty())
}
