use serde::{Deserialize, Serialize};

use crate::country::CountryRegistry;

/// Raw, possibly incomplete input as typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressFragment {
    pub street: String,
    pub house_number: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// Fully normalized address. Every field is present; `country` is never empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAddress {
    pub street: String,
    pub house_number: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressField {
    Street,
    HouseNumber,
    PostalCode,
    City,
    Country,
}

impl AddressField {
    pub const ALL: [AddressField; 5] = [
        AddressField::Street,
        AddressField::HouseNumber,
        AddressField::PostalCode,
        AddressField::City,
        AddressField::Country,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressField::Street => "street",
            AddressField::HouseNumber => "houseNumber",
            AddressField::PostalCode => "postalCode",
            AddressField::City => "city",
            AddressField::Country => "country",
        }
    }

    pub fn value<'a>(&self, address: &'a CanonicalAddress) -> &'a str {
        match self {
            AddressField::Street => &address.street,
            AddressField::HouseNumber => &address.house_number,
            AddressField::PostalCode => &address.postal_code,
            AddressField::City => &address.city,
            AddressField::Country => &address.country,
        }
    }
}

impl CanonicalAddress {
    pub fn has_coordinates(&self) -> bool {
        matches!((self.latitude, self.longitude), (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite())
    }

    /// Single-line text used as the free-text query for suggestion providers.
    pub fn free_text(&self) -> String {
        let street_line = join_non_empty(&[&self.street, &self.house_number], " ");
        let city_line = join_non_empty(&[&self.postal_code, &self.city], " ");
        join_non_empty(&[&street_line, &city_line], ", ")
    }
}

impl From<&CanonicalAddress> for AddressFragment {
    fn from(address: &CanonicalAddress) -> Self {
        Self {
            street: address.street.clone(),
            house_number: address.house_number.clone(),
            postal_code: address.postal_code.clone(),
            city: address.city.clone(),
            country: address.country.clone(),
            latitude: address.latitude.map(|value| value.to_string()),
            longitude: address.longitude.map(|value| value.to_string()),
        }
    }
}

/// Normalizes with the built-in country rules. Total and idempotent.
pub fn normalize(fragment: &AddressFragment) -> CanonicalAddress {
    normalize_with(fragment, CountryRegistry::global())
}

pub fn normalize_with(fragment: &AddressFragment, registry: &CountryRegistry) -> CanonicalAddress {
    let country = normalize_country(&fragment.country, registry.default_country());
    let rules = registry.rules_for(&country);
    let postal_code = rules
        .postal_format
        .apply(&collapse_whitespace(&fragment.postal_code));

    CanonicalAddress {
        street: collapse_whitespace(&fragment.street),
        house_number: strip_whitespace(&fragment.house_number),
        postal_code,
        city: capitalize_first(&collapse_whitespace(&fragment.city)),
        country,
        latitude: coerce_coordinate(fragment.latitude.as_deref()),
        longitude: coerce_coordinate(fragment.longitude.as_deref()),
    }
}

pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn normalize_country(value: &str, default_country: &str) -> String {
    let code = strip_whitespace(value).to_uppercase();
    if code.is_empty() {
        default_country.to_string()
    } else {
        code
    }
}

fn coerce_coordinate(value: Option<&str>) -> Option<f64> {
    let text = value?.trim();
    if text.is_empty() {
        return None;
    }
    text.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

fn join_non_empty(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
