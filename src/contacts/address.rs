//! Phone number normalization and recipient addresses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{MessengerError, Result};

/// Domain suffix for one-to-one chats.
pub const USER_DOMAIN: &str = "c.us";

/// International numbers carry 8 (small countries) to 15 (E.164 maximum) digits.
static VALID_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8,15}$").expect("valid regex"));

/// Keep digits and a leading `+`; everything else is dropped.
///
/// `"+51 974-672423"` becomes `"+51974672423"`.
pub fn normalize_number(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_digit() || (ch == '+' && out.is_empty()) {
            out.push(ch);
        }
    }
    out
}

/// Strip a `+` and then a `00` international prefix.
pub fn strip_international_prefix(normalized: &str) -> &str {
    let without_plus = normalized.strip_prefix('+').unwrap_or(normalized);
    without_plus.strip_prefix("00").unwrap_or(without_plus)
}

/// True when the number, minus its international prefix, is 8–15 digits.
pub fn is_valid_number(normalized: &str) -> bool {
    VALID_DIGITS.is_match(strip_international_prefix(normalized))
}

/// True when the number was written with an explicit international prefix.
pub fn is_international(normalized: &str) -> bool {
    normalized.starts_with('+') || normalized.starts_with("00")
}

/// A normalized phone number plus the provider domain suffix.
///
/// Equality and hashing only consider the digits, so `51974672423@c.us` and
/// `+51 974 672 423` address the same chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientAddress {
    digits: String,
    domain: String,
}

impl RecipientAddress {
    /// Parse operator input: either a chat id (`"51974672423@c.us"`) or a raw
    /// phone number in any common notation.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (number, domain) = match input.split_once('@') {
            Some((user, domain)) if !domain.is_empty() => (user, domain),
            Some(_) => {
                return Err(MessengerError::InvalidRecipient(input.to_string()));
            }
            None => (input, USER_DOMAIN),
        };

        let normalized = normalize_number(number);
        if !is_valid_number(&normalized) {
            return Err(MessengerError::InvalidRecipient(input.to_string()));
        }

        Ok(Self {
            digits: strip_international_prefix(&normalized).to_string(),
            domain: domain.to_string(),
        })
    }

    /// Digits only, without prefix or domain.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Chat id in provider notation: `<digits>@<domain>`.
    pub fn chat_id(&self) -> String {
        format!("{}@{}", self.digits, self.domain)
    }
}

impl PartialEq for RecipientAddress {
    fn eq(&self, other: &Self) -> bool {
        self.digits == other.digits
    }
}

impl Eq for RecipientAddress {}

impl Hash for RecipientAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digits.hash(state);
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.digits, self.domain)
    }
}

impl TryFrom<String> for RecipientAddress {
    type Error = MessengerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RecipientAddress> for String {
    fn from(value: RecipientAddress) -> Self {
        value.chat_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[rstest]
    #[case("+51 974-672423", "+51974672423")]
    #[case("(01) 234.5678", "012345678")]
    #[case("+34+600 11 22 33", "+34600112233")]
    #[case(" 0051974672423 ", "0051974672423")]
    #[case("abc", "")]
    fn test_normalize_number(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_number(raw), expected);
    }

    #[rstest]
    #[case("+51974672423", true)]
    #[case("0051974672423", true)]
    #[case("12345678", true)]
    #[case("1234567", false)]
    #[case("123456789012345", true)]
    #[case("1234567890123456", false)]
    #[case("+", false)]
    #[case("", false)]
    fn test_is_valid_number(#[case] number: &str, #[case] valid: bool) {
        assert_eq!(is_valid_number(number), valid);
    }

    #[test]
    fn test_spaced_peruvian_number_validates() {
        let normalized = normalize_number("+51 974-672423");
        assert_eq!(strip_international_prefix(&normalized).len(), 11);
        assert!(is_valid_number(&normalized));
        assert!(is_international(&normalized));
    }

    #[test]
    fn test_parse_accepts_chat_ids_and_raw_numbers() {
        let from_chat = RecipientAddress::parse("51974672423@c.us").unwrap();
        let from_raw = RecipientAddress::parse("+51 974 672 423").unwrap();
        assert_eq!(from_chat, from_raw);
        assert_eq!(from_raw.chat_id(), "51974672423@c.us");
        assert_eq!(from_raw.digits(), "51974672423");

        let mut set = HashSet::new();
        set.insert(from_chat);
        assert!(set.contains(&from_raw));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RecipientAddress::parse("12"),
            Err(MessengerError::InvalidRecipient(_))
        ));
        assert!(RecipientAddress::parse("51974672423@").is_err());
        assert!(RecipientAddress::parse("").is_err());
    }

    #[test]
    fn test_serde_uses_chat_id_notation() {
        let addr: RecipientAddress = serde_json::from_str("\"+51 974 672 423\"").unwrap();
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"51974672423@c.us\"");
        assert!(serde_json::from_str::<RecipientAddress>("\"123\"").is_err());
    }
}
