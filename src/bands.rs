//! Age band bucketing
//!
//! Bands are built once from `{start, end, step}`: fixed-width bands for
//! `start..end` plus an open-ended `"{end}+"` band. Construction clips the
//! last fixed band at `end - 1`, so lookups can never see two matches.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Label returned for ages below the first band
pub const UNKNOWN_AGE_GROUP: &str = "Unknown Age Group";

/// Band construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeBandConfig {
    /// First age covered
    pub start: i32,
    /// First age of the open-ended top band
    pub end: i32,
    /// Width of each fixed band
    pub step: i32,
}

impl Default for AgeBandConfig {
    fn default() -> Self {
        Self {
            start: 10,
            end: 90,
            step: 10,
        }
    }
}

/// A labeled, inclusive age interval. `max_age` of `None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgeBand {
    /// Display label, e.g. `"30-40"` or `"90+"`
    pub label: String,
    /// Lowest age in the band
    pub min_age: i32,
    /// Highest age in the band
    pub max_age: Option<i32>,
}

impl AgeBand {
    /// Whether `age` falls inside this band
    #[must_use]
    pub fn contains(&self, age: i32) -> bool {
        age >= self.min_age && self.max_age.map_or(true, |max| age <= max)
    }
}

/// Ordered, non-overlapping set of age bands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeBands {
    bands: Vec<AgeBand>,
}

impl Default for AgeBands {
    fn default() -> Self {
        // The default config is always valid
        Self::build(AgeBandConfig::default())
    }
}

impl AgeBands {
    /// Build bands from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBands`] if `step <= 0` or `end <= start`.
    ///
    /// # Example
    ///
    /// ```
    /// use tally::bands::{AgeBandConfig, AgeBands};
    ///
    /// let bands = AgeBands::new(AgeBandConfig::default())?;
    /// assert_eq!(bands.label_for(34), "30-40");
    /// assert_eq!(bands.label_for(90), "90+");
    /// # Ok::<(), tally::Error>(())
    /// ```
    pub fn new(config: AgeBandConfig) -> Result<Self> {
        if config.step <= 0 {
            return Err(Error::InvalidBands(format!(
                "step must be positive, got {}",
                config.step
            )));
        }
        if config.end <= config.start {
            return Err(Error::InvalidBands(format!(
                "end ({}) must be greater than start ({})",
                config.end, config.start
            )));
        }
        Ok(Self::build(config))
    }

    fn build(config: AgeBandConfig) -> Self {
        let AgeBandConfig { start, end, step } = config;
        let mut bands: Vec<AgeBand> = (start..end)
            .step_by(usize::try_from(step).unwrap_or(1))
            .map(|lower| AgeBand {
                label: format!("{lower}-{}", lower + step),
                min_age: lower,
                max_age: Some((lower + step - 1).min(end - 1)),
            })
            .collect();
        bands.push(AgeBand {
            label: format!("{end}+"),
            min_age: end,
            max_age: None,
        });
        Self { bands }
    }

    /// All bands in ascending order
    #[must_use]
    pub fn bands(&self) -> &[AgeBand] {
        &self.bands
    }

    /// Label of the band containing `age`, or [`UNKNOWN_AGE_GROUP`]
    #[must_use]
    pub fn label_for(&self, age: i32) -> &str {
        self.bands
            .iter()
            .find(|band| band.contains(age))
            .map_or(UNKNOWN_AGE_GROUP, |band| band.label.as_str())
    }

    /// Labels for a sequence of ages, same length and order as the input
    #[must_use]
    pub fn label_all(&self, ages: &[i32]) -> Vec<String> {
        ages.iter()
            .map(|&age| self.label_for(age).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let bands = AgeBands::default();
        assert_eq!(bands.bands().len(), 9);
        assert_eq!(bands.label_for(10), "10-20");
        assert_eq!(bands.label_for(19), "10-20");
        assert_eq!(bands.label_for(20), "20-30");
        assert_eq!(bands.label_for(89), "80-90");
        assert_eq!(bands.label_for(90), "90+");
        assert_eq!(bands.label_for(104), "90+");
    }

    #[test]
    fn test_below_start_is_unknown() {
        let bands = AgeBands::default();
        assert_eq!(bands.label_for(5), UNKNOWN_AGE_GROUP);
        assert_eq!(bands.label_for(9), UNKNOWN_AGE_GROUP);
        assert_eq!(bands.label_for(-3), UNKNOWN_AGE_GROUP);
    }

    #[test]
    fn test_label_all_preserves_order_and_length() {
        let bands = AgeBands::default();
        let labels = bands.label_all(&[45, 5, 90, 45]);
        assert_eq!(labels, vec!["40-50", UNKNOWN_AGE_GROUP, "90+", "40-50"]);
        assert!(bands.label_all(&[]).is_empty());
    }

    #[test]
    fn test_uneven_step_is_clipped() {
        let bands = AgeBands::new(AgeBandConfig {
            start: 10,
            end: 25,
            step: 10,
        })
        .unwrap();
        let ranges: Vec<_> = bands
            .bands()
            .iter()
            .map(|b| (b.min_age, b.max_age))
            .collect();
        assert_eq!(ranges, vec![(10, Some(19)), (20, Some(24)), (25, None)]);
        assert_eq!(bands.label_for(24), "20-30");
        assert_eq!(bands.label_for(25), "25+");
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let zero_step = AgeBandConfig {
            step: 0,
            ..AgeBandConfig::default()
        };
        assert!(matches!(
            AgeBands::new(zero_step),
            Err(Error::InvalidBands(_))
        ));

        let inverted = AgeBandConfig {
            start: 50,
            end: 20,
            step: 5,
        };
        assert!(matches!(AgeBands::new(inverted), Err(Error::InvalidBands(_))));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: every age at or above start matches exactly one band
            #[test]
            fn prop_exactly_one_band(
                start in 0i32..50,
                width in 1i32..80,
                step in 1i32..25,
                age in 0i32..200
            ) {
                let bands = AgeBands::new(AgeBandConfig { start, end: start + width, step }).unwrap();
                let matches = bands.bands().iter().filter(|b| b.contains(age)).count();
                if age >= start {
                    prop_assert_eq!(matches, 1);
                } else {
                    prop_assert_eq!(matches, 0);
                }
            }

            /// Property: no two bands share an integer
            #[test]
            fn prop_bands_disjoint(start in 0i32..50, width in 1i32..80, step in 1i32..25) {
                let bands = AgeBands::new(AgeBandConfig { start, end: start + width, step }).unwrap();
                for pair in bands.bands().windows(2) {
                    let upper = pair[0].max_age.unwrap();
                    prop_assert_eq!(upper + 1, pair[1].min_age);
                }
            }
        }
    }
}
