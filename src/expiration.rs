//! Expiration risk tiers
//!
//! Thresholds are checked in order and the first match wins:
//! `< 0` Expired, `<= 30` Critical, `<= 90` Nearing Expiration,
//! `<= 180` Safe. Anything further out has no status.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk tier for a product lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExpirationStatus {
    /// Past the expiration date
    Expired,
    /// 0-30 days left
    Critical,
    /// 31-90 days left
    NearingExpiration,
    /// 91-180 days left
    Safe,
    /// More than 180 days left
    NoStatus,
}

impl ExpirationStatus {
    /// The four tiers that carry a label, in severity order
    pub const RANKED: [Self; 4] = [
        Self::Expired,
        Self::Critical,
        Self::NearingExpiration,
        Self::Safe,
    ];

    /// Classify a signed day count
    #[must_use]
    pub const fn classify(days_to_expire: i64) -> Self {
        if days_to_expire < 0 {
            Self::Expired
        } else if days_to_expire <= 30 {
            Self::Critical
        } else if days_to_expire <= 90 {
            Self::NearingExpiration
        } else if days_to_expire <= 180 {
            Self::Safe
        } else {
            Self::NoStatus
        }
    }

    /// Display label, `None` for [`ExpirationStatus::NoStatus`]
    #[must_use]
    pub const fn label(self) -> Option<&'static str> {
        match self {
            Self::Expired => Some("Expired"),
            Self::Critical => Some("Critical"),
            Self::NearingExpiration => Some("Nearing Expiration"),
            Self::Safe => Some("Safe"),
            Self::NoStatus => None,
        }
    }

    /// Parse a display label back into a status
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::RANKED
            .into_iter()
            .find(|status| status.label() == Some(label))
    }
}

impl fmt::Display for ExpirationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().unwrap_or("No Status"))
    }
}

/// Signed whole days from `reference` to `expiration`
#[must_use]
pub fn days_to_expire(expiration: NaiveDate, reference: NaiveDate) -> i64 {
    (expiration - reference).num_days()
}
