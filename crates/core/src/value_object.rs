//! Value objects: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. The ones here are validated on construction (and on
//! deserialization), so a `CountryCode` or `Email` held anywhere in the services is
//! already known to be well-formed.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// construct a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Country code attached to a company.
///
/// Both ISO 3166 alpha-2 (`VN`) and alpha-3 (`AUS`) forms are in circulation
/// between the services, so 2 or 3 ASCII letters are accepted. Stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = raw.as_ref().trim();
        let len = trimmed.len();
        if !(2..=3).contains(&len) || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "country code must be 2 or 3 ASCII letters, got {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for CountryCode {}

impl core::fmt::Display for CountryCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CountryCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CountryCode> for String {
    fn from(value: CountryCode) -> Self {
        value.0
    }
}

/// Login e-mail of a company account. Stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = raw.as_ref().trim();
        let valid = match trimmed.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && domain.contains('.')
                    && !trimmed.contains(char::is_whitespace)
                    && !domain.contains('@')
            }
            None => false,
        };
        if !valid {
            return Err(DomainError::validation(format!("invalid email address: {trimmed:?}")));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Email {}

impl core::fmt::Display for Email {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn country_code_is_normalised_to_upper_case() {
        assert_eq!(CountryCode::parse(" vn ").unwrap().as_str(), "VN");
        assert_eq!(CountryCode::parse("aus").unwrap().as_str(), "AUS");
    }

    #[test]
    fn country_code_rejects_wrong_shapes() {
        for bad in ["", "V", "VNMX", "V1", "é"] {
            assert!(CountryCode::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn country_code_deserialization_validates() {
        let ok: CountryCode = serde_json::from_str("\"sg\"").unwrap();
        assert_eq!(ok.as_str(), "SG");
        assert!(serde_json::from_str::<CountryCode>("\"12\"").is_err());
    }

    #[test]
    fn email_requires_local_part_and_dotted_domain() {
        assert_eq!(Email::parse("HR@Acme.io").unwrap().as_str(), "hr@acme.io");
        for bad in ["acme.io", "@acme.io", "hr@", "hr@acme", "hr@.io", "h r@acme.io"] {
            assert!(Email::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    proptest! {
        #[test]
        fn any_two_or_three_letters_parse(code in "[a-zA-Z]{2,3}") {
            let parsed = CountryCode::parse(&code).unwrap();
            prop_assert_eq!(parsed.as_str(), code.to_ascii_uppercase());
        }
    }
}
