//! Chemical reading normalization
//!
//! Lab exports mix numbers, detection-limit markers (`<LOQ`, `<5`) and
//! "no reference dose" tokens in the same column. [`normalize`] maps every
//! token to exactly one [`Reading`] and never fails.

use serde::Serialize;
use std::fmt;

/// Numeric stand-in for a result below the limit of quantification
pub const BELOW_DETECTION_VALUE: f64 = 0.001;

/// Tokens meaning "no tolerable intake defined"
const NOT_APPLICABLE_TOKENS: [&str; 2] = ["NO RfD", "NO TDI"];

/// A normalized measurement cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum Reading {
    /// Plain number
    Numeric(f64),
    /// `<LOQ`: present but below the quantification limit
    BelowDetectionLimit,
    /// `NO RfD` / `NO TDI`: no reference value exists
    NotApplicable,
    /// Anything else, unchanged
    RawText(String),
}

impl Reading {
    /// Value usable in numeric aggregates.
    ///
    /// Below-detection readings count as [`BELOW_DETECTION_VALUE`];
    /// not-applicable and raw text readings are excluded.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::BelowDetectionLimit => Some(BELOW_DETECTION_VALUE),
            Self::NotApplicable | Self::RawText(_) => None,
        }
    }

    /// Whether this reading takes part in numeric aggregates
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.value().is_some()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::BelowDetectionLimit => f.write_str("<LOQ"),
            Self::NotApplicable => f.write_str("N/A"),
            Self::RawText(text) => f.write_str(text),
        }
    }
}

fn all_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Normalize one raw token.
///
/// # Example
///
/// ```
/// use tally::normalize::{normalize, Reading};
///
/// assert_eq!(normalize("<LOQ"), Reading::BelowDetectionLimit);
/// assert_eq!(normalize("<5"), Reading::Numeric(5.0));
/// assert_eq!(normalize("NO RfD"), Reading::NotApplicable);
/// assert_eq!(normalize("abc"), Reading::RawText("abc".to_string()));
/// ```
#[must_use]
pub fn normalize(token: &str) -> Reading {
    if let Some(rest) = token.strip_prefix('<') {
        if token.contains("LOQ") {
            return Reading::BelowDetectionLimit;
        }
        if all_digits(rest) {
            if let Ok(v) = rest.parse::<f64>() {
                return Reading::Numeric(v);
            }
        }
        return Reading::RawText(token.to_string());
    }

    if token.contains('.') {
        if all_digits(&token.replace('.', "")) {
            if let Ok(v) = token.parse::<f64>() {
                return Reading::Numeric(v);
            }
        }
        return Reading::RawText(token.to_string());
    }

    if all_digits(token) {
        if let Ok(v) = token.parse::<f64>() {
            return Reading::Numeric(v);
        }
    }

    if NOT_APPLICABLE_TOKENS.contains(&token) {
        return Reading::NotApplicable;
    }

    Reading::RawText(token.to_string())
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_limit_markers() {
        assert_eq!(normalize("<LOQ"), Reading::BelowDetectionLimit);
        assert_eq!(normalize("<LOQ (12)"), Reading::BelowDetectionLimit);
        assert_eq!(normalize("<5"), Reading::Numeric(5.0));
        assert_eq!(normalize("<120"), Reading::Numeric(120.0));
        assert_eq!(normalize("<"), Reading::RawText("<".to_string()));
        assert_eq!(normalize("<5.5"), Reading::RawText("<5.5".to_string()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(normalize("12.34"), Reading::Numeric(12.34));
        assert_eq!(normalize("42"), Reading::Numeric(42.0));
        assert_eq!(normalize(".5"), Reading::Numeric(0.5));
        assert_eq!(normalize("0"), Reading::Numeric(0.0));
    }

    #[test]
    fn test_not_applicable_tokens() {
        assert_eq!(normalize("NO RfD"), Reading::NotApplicable);
        assert_eq!(normalize("NO TDI"), Reading::NotApplicable);
        assert_eq!(
            normalize("no rfd"),
            Reading::RawText("no rfd".to_string())
        );
    }

    #[test]
    fn test_pass_through() {
        assert_eq!(normalize("abc"), Reading::RawText("abc".to_string()));
        assert_eq!(normalize(""), Reading::RawText(String::new()));
        assert_eq!(normalize("1.2.3"), Reading::RawText("1.2.3".to_string()));
        assert_eq!(normalize("-4"), Reading::RawText("-4".to_string()));
        assert_eq!(normalize(" 7"), Reading::RawText(" 7".to_string()));
    }

    #[test]
    fn test_aggregate_values() {
        assert_eq!(normalize("<LOQ").value(), Some(BELOW_DETECTION_VALUE));
        assert_eq!(normalize("3.5").value(), Some(3.5));
        assert_eq!(normalize("NO TDI").value(), None);
        assert!(!normalize("pending").is_numeric());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: normalization is total and raw text is returned unchanged
            #[test]
            fn prop_normalize_total(token in ".{0,12}") {
                if let Reading::RawText(text) = normalize(&token) {
                    prop_assert_eq!(text, token);
                }
            }

            /// Property: plain integers keep their value
            #[test]
            fn prop_digits_are_numeric(n in 0u32..1_000_000) {
                prop_assert_eq!(normalize(&n.to_string()), Reading::Numeric(f64::from(n)));
            }
        }
    }
}
