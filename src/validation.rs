use std::collections::BTreeMap;

use serde::Serialize;

use crate::address::{AddressField, CanonicalAddress};
use crate::country::CountryRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: BTreeMap<AddressField, String>,
}

impl ValidationResult {
    fn from_errors(errors: BTreeMap<AddressField, String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn message(&self, field: AddressField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }
}

pub fn validate(address: &CanonicalAddress) -> ValidationResult {
    validate_with(address, CountryRegistry::global())
}

/// Checks required fields and the postal pattern of the address' country.
/// Never performs I/O.
pub fn validate_with(address: &CanonicalAddress, registry: &CountryRegistry) -> ValidationResult {
    let rules = registry.rules_for(&address.country);
    let mut errors = BTreeMap::new();

    for field in &rules.required {
        if field.value(address).trim().is_empty() {
            errors.insert(*field, format!("{} is required.", field.as_str()));
        }
    }

    let postal_code = address.postal_code.trim();
    if !postal_code.is_empty() && !rules.postal_matches(postal_code) {
        errors.insert(
            AddressField::PostalCode,
            format!(
                "{} has an invalid format for {}.",
                AddressField::PostalCode.as_str(),
                rules.code
            ),
        );
    }

    ValidationResult::from_errors(errors)
}
