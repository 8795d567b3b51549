use std::cmp::Ordering;

use crate::address::CanonicalAddress;
use crate::suggestion::Suggestion;

/// Stable sort by score, city match, postal match, then provider priority.
/// Remaining ties keep their input order.
pub fn rank(base: &CanonicalAddress, mut suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    suggestions.sort_by(|a, b| compare(base, a, b));
    suggestions
}

pub fn compare(base: &CanonicalAddress, a: &Suggestion, b: &Suggestion) -> Ordering {
    b.match_score
        .total_cmp(&a.match_score)
        .then_with(|| field_match(&base.city, &b.city).cmp(&field_match(&base.city, &a.city)))
        .then_with(|| {
            field_match(&base.postal_code, &b.postal_code)
                .cmp(&field_match(&base.postal_code, &a.postal_code))
        })
        .then_with(|| {
            b.provider_source
                .priority()
                .cmp(&a.provider_source.priority())
        })
}

fn field_match(expected: &str, candidate: &Option<String>) -> bool {
    let expected = expected.trim();
    if expected.is_empty() {
        return false;
    }
    candidate
        .as_deref()
        .map(|value| value.trim().to_lowercase() == expected.to_lowercase())
        .unwrap_or(false)
}
