use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::address::AddressField;

pub const FALLBACK_COUNTRY: &str = "PL";

const DEFAULT_REQUIRED: [AddressField; 4] = [
    AddressField::Street,
    AddressField::PostalCode,
    AddressField::City,
    AddressField::Country,
];

static BUILTIN_RULES: Lazy<Vec<CountryRules>> = Lazy::new(|| {
    vec![
        CountryRules::new("PL")
            .with_postal_format(PostalFormat::Split {
                digits: 5,
                at: 2,
                separator: '-',
            })
            .with_postal_pattern(r"^\d{2}-\d{3}$"),
        CountryRules::new("DE").with_postal_pattern(r"^\d{5}$"),
        CountryRules::new("CZ")
            .with_postal_format(PostalFormat::Split {
                digits: 5,
                at: 3,
                separator: ' ',
            })
            .with_postal_pattern(r"^\d{3} \d{2}$"),
        CountryRules::new("GB"),
    ]
});

static DEFAULT_REGISTRY: Lazy<CountryRegistry> =
    Lazy::new(|| CountryRegistry::with_default_country(FALLBACK_COUNTRY));

/// How a raw postal code is reshaped for a country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostalFormat {
    PassThrough,
    /// Exactly `digits` raw ASCII digits get `separator` inserted after `at` of them.
    Split {
        digits: usize,
        at: usize,
        separator: char,
    },
}

impl PostalFormat {
    pub fn apply(&self, raw: &str) -> String {
        match *self {
            PostalFormat::PassThrough => raw.to_string(),
            PostalFormat::Split {
                digits,
                at,
                separator,
            } => {
                let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                if compact.len() == digits && compact.chars().all(|c| c.is_ascii_digit()) {
                    let (head, tail) = compact.split_at(at.min(digits));
                    format!("{head}{separator}{tail}")
                } else {
                    raw.to_string()
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CountryRules {
    pub code: String,
    pub postal_format: PostalFormat,
    pub postal_pattern: Option<Regex>,
    pub required: Vec<AddressField>,
}

impl CountryRules {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_ascii_uppercase(),
            postal_format: PostalFormat::PassThrough,
            postal_pattern: None,
            required: DEFAULT_REQUIRED.to_vec(),
        }
    }

    pub fn with_postal_format(mut self, format: PostalFormat) -> Self {
        self.postal_format = format;
        self
    }

    /// Built-in patterns are literals; a malformed custom pattern leaves the
    /// postal code unchecked rather than failing.
    pub fn with_postal_pattern(mut self, pattern: &str) -> Self {
        self.postal_pattern = Regex::new(pattern).ok();
        self
    }

    pub fn with_required(mut self, required: &[AddressField]) -> Self {
        self.required = required.to_vec();
        self
    }

    pub fn postal_matches(&self, postal_code: &str) -> bool {
        self.postal_pattern
            .as_ref()
            .map(|pattern| pattern.is_match(postal_code))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct CountryRegistry {
    default_country: String,
    rules: HashMap<String, CountryRules>,
    fallback: CountryRules,
}

impl CountryRegistry {
    pub fn with_default_country(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        let default_country = if code.is_empty() {
            FALLBACK_COUNTRY.to_string()
        } else {
            code
        };
        let rules = BUILTIN_RULES
            .iter()
            .map(|rules| (rules.code.clone(), rules.clone()))
            .collect();
        Self {
            default_country,
            rules,
            fallback: CountryRules::new(""),
        }
    }

    /// Shared registry used by the free `normalize` and `validate` functions.
    pub fn global() -> &'static CountryRegistry {
        &DEFAULT_REGISTRY
    }

    pub fn register(&mut self, rules: CountryRules) {
        self.rules.insert(rules.code.clone(), rules);
    }

    pub fn default_country(&self) -> &str {
        &self.default_country
    }

    pub fn rules_for(&self, code: &str) -> &CountryRules {
        self.rules
            .get(&code.to_ascii_uppercase())
            .unwrap_or(&self.fallback)
    }
}

impl Default for CountryRegistry {
    fn default() -> Self {
        Self::with_default_country(FALLBACK_COUNTRY)
    }
}
