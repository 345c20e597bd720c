//! Configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file) is a valid configuration:
//!
//! ```toml
//! [marathon]
//! path = "data/nyc_marathon_2024.csv"
//! top_countries = 10
//!
//! [marathon.age_bands]
//! start = 10
//! end = 90
//! step = 10
//!
//! [lab]
//! path = "data/samples.csv"
//! reference_date = "2025-01-15"
//! top_tags = 15
//! ```

use crate::bands::AgeBandConfig;
use crate::{Error, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Race results settings
    pub marathon: MarathonConfig,
    /// Lab sample settings
    pub lab: LabConfig,
}

/// Race results settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarathonConfig {
    /// Source CSV
    pub path: Option<PathBuf>,
    /// Age band parameters
    pub age_bands: AgeBandConfig,
    /// Countries in the top-countries table
    pub top_countries: usize,
    /// Runners in the most-races table
    pub top_runners: usize,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            path: None,
            age_bands: AgeBandConfig::default(),
            top_countries: 10,
            top_runners: 10,
        }
    }
}

/// Lab sample settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Source CSV
    pub path: Option<PathBuf>,
    /// Date that days-to-expire is measured from; today when unset
    pub reference_date: Option<NaiveDate>,
    /// Tags in the top-tags table
    pub top_tags: usize,
    /// Tags in the expired-lots table
    pub top_expired_tags: usize,
    /// Characters kept in product, lot and tag labels
    pub label_width: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            path: None,
            reference_date: None,
            top_tags: 15,
            top_expired_tags: 10,
            label_width: 20,
        }
    }
}

impl LabConfig {
    /// Configured reference date, or today's local date
    #[must_use]
    pub fn reference_date_or_today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }
}

impl TallyConfig {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns [`Error::Config`] on malformed TOML or unknown value types
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file can't be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TallyConfig::from_toml_str("").unwrap();
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.marathon.top_countries, 10);
        assert_eq!(config.marathon.age_bands.step, 10);
        assert_eq!(config.lab.top_tags, 15);
        assert_eq!(config.lab.label_width, 20);
    }

    #[test]
    fn test_partial_config() {
        let config = TallyConfig::from_toml_str(
            r#"
            [marathon]
            path = "runners.csv"

            [marathon.age_bands]
            step = 5

            [lab]
            reference_date = "2025-01-15"
            "#,
        )
        .unwrap();

        assert_eq!(config.marathon.path, Some(PathBuf::from("runners.csv")));
        assert_eq!(config.marathon.age_bands.step, 5);
        assert_eq!(config.marathon.age_bands.start, 10);
        assert_eq!(
            config.lab.reference_date_or_today(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
        assert_eq!(config.lab.top_expired_tags, 10);
    }

    #[test]
    fn test_bad_config() {
        let err = TallyConfig::from_toml_str("[lab]\ntop_tags = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "[lab]\ntop_tags = 5\n").unwrap();
        assert_eq!(TallyConfig::load(&path).unwrap().lab.top_tags, 5);
        assert!(TallyConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
