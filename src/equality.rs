//! Structural equality and stable short hashes over the seven identifying
//! fields of an address.
//!
//! The hash is a 32-bit rolling hash: cheap and stable across runs, but not
//! collision free. Callers that key data by it (the geocode cache) keep the
//! full identity string next to the entry and compare on lookup.

use crate::address::CanonicalAddress;

const COORDINATE_SCALE: f64 = 1_000_000.0;
const FIELD_SEPARATOR: char = '\u{1f}';

pub fn equals(a: &CanonicalAddress, b: &CanonicalAddress) -> bool {
    identity_key(a) == identity_key(b)
}

pub fn hash(address: &CanonicalAddress) -> String {
    rolling_hash(&identity_key(address))
}

/// Normalized 7-tuple joined into one string; two addresses are equal exactly
/// when their identity keys are.
pub fn identity_key(address: &CanonicalAddress) -> String {
    let lat = coordinate_token(address.latitude);
    let lng = coordinate_token(address.longitude);
    join_tokens(&[
        &text_token(&address.street),
        &text_token(&address.house_number),
        &text_token(&address.postal_code),
        &text_token(&address.city),
        &text_token(&address.country),
        &lat,
        &lng,
    ])
}

/// Hash over arbitrary text fields, normalized the same way as address fields.
pub fn fingerprint(fields: &[&str]) -> String {
    let tokens: Vec<String> = fields.iter().map(|field| text_token(field)).collect();
    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    rolling_hash(&join_tokens(&refs))
}

pub fn rolling_hash(input: &str) -> String {
    let hash = input
        .bytes()
        .fold(0_u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(u32::from(byte)));
    format!("{hash:08x}")
}

fn text_token(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn coordinate_token(value: Option<f64>) -> String {
    match value.filter(|number| number.is_finite()) {
        Some(number) => {
            let scaled = (number * COORDINATE_SCALE).round() as i64;
            scaled.to_string()
        }
        None => String::new(),
    }
}

fn join_tokens(tokens: &[&str]) -> String {
    let mut joined = String::new();
    for (index, token) in tokens.iter().enumerate() {
        if index > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.push_str(token);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalAddress {
        CanonicalAddress {
            street: "Main Street".into(),
            house_number: "10".into(),
            postal_code: "00-123".into(),
            city: "Warsaw".into(),
            country: "PL".into(),
            latitude: Some(52.229_676),
            longitude: Some(21.012_229),
        }
    }

    #[test]
    fn ignores_case_and_whitespace() {
        let mut other = sample();
        other.street = "  main   STREET ".into();
        other.city = "WARSAW".into();
        assert!(equals(&sample(), &other));
        assert_eq!(hash(&sample()), hash(&other));
    }

    #[test]
    fn compares_coordinates_to_six_decimals() {
        let mut close = sample();
        close.latitude = Some(52.229_676_000_4);
        assert!(equals(&sample(), &close));

        let mut far = sample();
        far.latitude = Some(52.229_677);
        assert!(!equals(&sample(), &far));
        assert_ne!(hash(&sample()), hash(&far));
    }

    #[test]
    fn missing_coordinates_differ_from_present() {
        let mut bare = sample();
        bare.latitude = None;
        assert!(!equals(&sample(), &bare));
    }

    #[test]
    fn hash_is_short_and_stable() {
        let first = hash(&sample());
        assert_eq!(first.len(), 8);
        assert_eq!(first, hash(&sample().clone()));
        assert_eq!(rolling_hash(""), "00000000");
        assert_eq!(rolling_hash("a"), "00000061");
    }

    #[test]
    fn fingerprint_normalizes_fields() {
        assert_eq!(fingerprint(&["A ", "x"]), fingerprint(&["a", " X"]));
        assert_ne!(fingerprint(&["ab", ""]), fingerprint(&["a", "b"]));
    }
}
