use std::collections::HashSet;

use crate::address::CanonicalAddress;
use crate::equality::fingerprint;
use crate::suggestion::Suggestion;

/// Dedup hash over address-identifying fields only; coordinates and score
/// never participate. A missing country falls back to the input's country.
pub fn suggestion_hash(base: &CanonicalAddress, suggestion: &Suggestion) -> String {
    let country = suggestion
        .country_code
        .as_deref()
        .unwrap_or(base.country.as_str());
    fingerprint(&[
        suggestion.street.as_deref().unwrap_or_default(),
        suggestion.house_number.as_deref().unwrap_or_default(),
        suggestion.postal_code.as_deref().unwrap_or_default(),
        suggestion.city.as_deref().unwrap_or_default(),
        country,
    ])
}

/// Flattens the lists keeping the first suggestion seen per hash, in
/// first-seen order.
pub fn merge(base: &CanonicalAddress, lists: Vec<Vec<Suggestion>>) -> Vec<Suggestion> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|suggestion| seen.insert(suggestion_hash(base, suggestion)))
        .collect()
}
