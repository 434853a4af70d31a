//! Address validation
//!
//! Checks a free-text address for the structural parts a polling lookup needs
//! before any network call is made. The rules run in a fixed order and stop at
//! the first failure so the user gets one specific correction at a time.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const EXAMPLE_ADDRESS: &str = "555 Market Street, San Francisco, CA 94105";

/// Why an address was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing address")]
    MissingAddress,

    #[error("incomplete address: expected street, city and state with ZIP")]
    Incomplete,

    #[error("missing street number")]
    MissingStreetNumber,

    #[error("address is not in {region}")]
    WrongRegion { region: String },

    #[error("missing postal code")]
    MissingPostalCode,

    #[error("invalid coordinates ({lat}, {lng})")]
    InvalidCoordinates { lat: f64, lng: f64 },
}

impl ValidationError {
    /// Banner text with an example of the expected format
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::MissingAddress => "Please enter an address".to_string(),
            ValidationError::Incomplete => format!(
                "Please enter a complete address with street, city, state and ZIP code (e.g. {EXAMPLE_ADDRESS})."
            ),
            ValidationError::MissingStreetNumber => format!(
                "Please include a street number in your address (e.g. {EXAMPLE_ADDRESS})."
            ),
            ValidationError::WrongRegion { region } => {
                format!("Please enter a {region} address for accurate polling information.")
            }
            ValidationError::MissingPostalCode => {
                format!("Please include a 5-digit ZIP code (e.g. {EXAMPLE_ADDRESS}).")
            }
            ValidationError::InvalidCoordinates { .. } => {
                "Latitude must be between -90 and 90 and longitude between -180 and 180."
                    .to_string()
            }
        }
    }
}

/// How strictly addresses are checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// All structural rules
    #[default]
    Strict,
    /// Only a non-empty address mentioning the region
    Lenient,
}

/// The area the service supports, e.g. a US state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Display name used in messages
    pub name: String,
    /// Words that identify the region in an address, matched case-insensitively
    pub tokens: Vec<String>,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            name: "California".to_string(),
            tokens: vec!["california".to_string(), "ca".to_string()],
        }
    }
}

impl Region {
    /// Case-insensitive pattern for any region token, bounded by non-letters so
    /// `"CA94105"` matches `ca` while `"Cascade"` does not
    #[must_use]
    pub fn pattern(&self) -> Option<Regex> {
        let alternatives: Vec<String> = self
            .tokens
            .iter()
            .map(|token| {
                token
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|word| !word.is_empty())
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"[^\p{L}\p{N}]+")
            })
            .filter(|token| !token.is_empty())
            .collect();
        if alternatives.is_empty() {
            return None;
        }
        Regex::new(&format!(
            r"(?i)(?:^|\P{{L}})(?:{})(?:\P{{L}}|$)",
            alternatives.join("|")
        ))
        .ok()
    }

    /// Whether `text` mentions one of the region tokens as whole words
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.pattern().is_some_and(|re| re.is_match(text))
    }
}

/// Five digits not touching other digits, optionally followed by `-dddd`
static POSTAL_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)\d{5}(?:-\d{4})?(?:\D|$)").unwrap_or_else(|e| unreachable!("{e}"))
});

/// Validates addresses against a region
#[derive(Debug, Clone)]
pub struct AddressValidator {
    region: Region,
    region_pattern: Option<Regex>,
    mode: ValidationMode,
}

impl Default for AddressValidator {
    fn default() -> Self {
        Self::new(Region::default(), ValidationMode::default())
    }
}

impl AddressValidator {
    #[must_use]
    pub fn new(region: Region, mode: ValidationMode) -> Self {
        let region_pattern = region.pattern();
        Self {
            region,
            region_pattern,
            mode,
        }
    }

    fn in_region(&self, text: &str) -> bool {
        self.region_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(text))
    }

    /// Validate a free-text address
    pub fn validate(&self, address: &str) -> Result<(), ValidationError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ValidationError::MissingAddress);
        }

        if self.mode == ValidationMode::Lenient {
            return if self.in_region(address) {
                Ok(())
            } else {
                Err(self.wrong_region())
            };
        }

        let segments: Vec<&str> = address.split(',').map(str::trim).collect();
        if segments.len() < 3 {
            debug!("Address has {} segments, need 3", segments.len());
            return Err(ValidationError::Incomplete);
        }

        if !segments[0].chars().any(|c| c.is_ascii_digit()) {
            return Err(ValidationError::MissingStreetNumber);
        }

        let last = segments[segments.len() - 1];
        if !self.in_region(last) {
            return Err(self.wrong_region());
        }

        if !POSTAL_CODE.is_match(address) {
            return Err(ValidationError::MissingPostalCode);
        }

        Ok(())
    }

    fn wrong_region(&self) -> ValidationError {
        ValidationError::WrongRegion {
            region: self.region.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn strict() -> AddressValidator {
        AddressValidator::default()
    }

    #[test]
    fn test_accepts_complete_address() {
        assert_eq!(strict().validate(EXAMPLE_ADDRESS), Ok(()));
        assert_eq!(
            strict().validate("1600 Amphitheatre Pkwy, Mountain View, California 94043-1351"),
            Ok(())
        );
    }

    #[rstest]
    #[case("")]
    #[case("   \t ")]
    fn test_missing_address(#[case] input: &str) {
        assert_eq!(strict().validate(input), Err(ValidationError::MissingAddress));
    }

    #[rstest]
    #[case("123 Main St, Springfield")]
    #[case("123 Main St")]
    #[case("Market Street San Francisco CA 94105")]
    #[case(", CA 94105")]
    fn test_incomplete_address(#[case] input: &str) {
        assert_eq!(strict().validate(input), Err(ValidationError::Incomplete));
    }

    #[rstest]
    #[case("Market Street, San Francisco, CA 94105")]
    #[case("One Market, San Francisco, CA 94105")]
    fn test_missing_street_number(#[case] input: &str) {
        assert_eq!(
            strict().validate(input),
            Err(ValidationError::MissingStreetNumber)
        );
    }

    #[rstest]
    #[case("555 Market Street, Portland, OR 97201")]
    #[case("555 Market Street, San Francisco, 94105")]
    #[case("10 Cascade Rd, Bend, Oregon 97701")]
    fn test_wrong_region(#[case] input: &str) {
        assert!(matches!(
            strict().validate(input),
            Err(ValidationError::WrongRegion { .. })
        ));
    }

    #[rstest]
    #[case("555 Market Street, San Francisco, CA")]
    #[case("555 Market Street, San Francisco, CA 9410")]
    #[case("555 Market Street, San Francisco, CA 941050")]
    fn test_missing_postal_code(#[case] input: &str) {
        assert_eq!(
            strict().validate(input),
            Err(ValidationError::MissingPostalCode)
        );
    }

    #[test]
    fn test_empty_middle_segment_still_counts() {
        assert_eq!(strict().validate("123 Main St, , CA 94105"), Ok(()));
    }

    #[rstest]
    #[case("123 Main St, Fresno, CA94105")]
    #[case("123 Main St, Fresno, ca-94105")]
    #[case("9 Elm St, Davis, California 95616-1234")]
    fn test_region_and_zip_without_separator(#[case] input: &str) {
        assert_eq!(strict().validate(input), Ok(()));
    }

    #[test]
    fn test_postal_code_pattern() {
        assert!(POSTAL_CODE.is_match("CA 94105"));
        assert!(POSTAL_CODE.is_match("CA94105"));
        assert!(POSTAL_CODE.is_match("94043-1351"));
        assert!(!POSTAL_CODE.is_match("CA 9410"));
        assert!(!POSTAL_CODE.is_match("CA 941050"));
    }

    #[test]
    fn test_rules_short_circuit_in_order() {
        // No street number and no ZIP: the street number rule fires first
        assert_eq!(
            strict().validate("Market Street, San Francisco, Nevada"),
            Err(ValidationError::MissingStreetNumber)
        );
    }

    #[test]
    fn test_region_matches_whole_words() {
        let region = Region::default();
        assert!(region.matches("San Francisco, CA 94105"));
        assert!(region.matches("Sacramento, california"));
        assert!(!region.matches("Cascade Locks, OR"));
        assert!(!region.matches("Nevada"));

        let nc = Region {
            name: "North Carolina".to_string(),
            tokens: vec!["north carolina".to_string(), "nc".to_string()],
        };
        assert!(nc.matches("Raleigh, North  Carolina 27601"));
        assert!(!nc.matches("South Carolina"));
    }

    #[test]
    fn test_lenient_mode_only_checks_region() {
        let lenient = AddressValidator::new(Region::default(), ValidationMode::Lenient);
        assert_eq!(lenient.validate("Main St, Sacramento, CA"), Ok(()));
        assert_eq!(lenient.validate("Sacramento CA"), Ok(()));
        assert!(matches!(
            lenient.validate("Portland, OR"),
            Err(ValidationError::WrongRegion { .. })
        ));
        assert_eq!(lenient.validate(""), Err(ValidationError::MissingAddress));
    }

    #[test]
    fn test_user_messages_include_example() {
        assert!(ValidationError::Incomplete.user_message().contains(EXAMPLE_ADDRESS));
        let wrong = ValidationError::WrongRegion {
            region: "California".to_string(),
        };
        assert!(wrong.user_message().contains("California address"));
    }
}
