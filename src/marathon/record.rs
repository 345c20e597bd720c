//! Runner rows: raw CSV shape, typed record, Arrow layout

use crate::bands::AgeBands;
use crate::duration::parse_minutes;
use crate::Result;
use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Runner gender as reported by the race
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    /// Men
    M,
    /// Women
    W,
    /// Non-binary / other
    X,
}

impl Gender {
    /// Code used in the dataset
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::M => "M",
            Self::W => "W",
            Self::X => "X",
        }
    }

    /// Display name used in legends
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::M => "Men",
            Self::W => "Women",
            Self::X => "Other",
        }
    }

    /// Parse a dataset code
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::M),
            "W" => Some(Self::W),
            "X" => Some(Self::X),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Region label for runners from the host country
pub const HOME_REGION: &str = "USA";
/// Region label for everyone else
pub const ABROAD_REGION: &str = "Abroad";

/// One CSV row before validation. Unparseable cells become `None`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRunner {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    age: Option<i32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    gender: Option<Gender>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    state_province: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    overall_place: Option<i64>,
    #[serde(default)]
    overall_time: Option<String>,
    #[serde(default)]
    pace: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    gender_place: Option<i64>,
    #[serde(default)]
    age_grade_time: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    age_grade_place: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    age_grade_percent: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    races_count: Option<i32>,
}

/// A validated runner with derived columns
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerRecord {
    /// Runner first name
    pub first_name: String,
    /// Age on race day
    pub age: i32,
    /// Derived age band label
    pub age_group: String,
    /// Gender
    pub gender: Gender,
    /// Home city
    pub city: String,
    /// Three-letter country code
    pub country_code: String,
    /// State or province
    pub state_province: String,
    /// Finish position
    pub overall_place: i64,
    /// Finish time text
    pub overall_time: String,
    /// Pace text, minutes per mile
    pub pace: String,
    /// Position within gender
    pub gender_place: i64,
    /// Age-graded time text
    pub age_grade_time: String,
    /// Age-graded position
    pub age_grade_place: i64,
    /// Age-graded percentage
    pub age_grade_percent: f64,
    /// Races run, lifetime
    pub races_count: i32,
    /// Derived pace in minutes
    pub pace_minutes: f64,
    /// Derived `USA` / `Abroad`
    pub region: String,
}

/// Non-empty text or `None`
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawRunner {
    /// Validate and derive. `Ok(None)` means a required field is missing.
    ///
    /// # Errors
    /// Returns [`crate::Error::ParseError`] if the pace text is malformed
    pub fn into_record(self, bands: &AgeBands) -> Result<Option<RunnerRecord>> {
        let (
            Some(first_name),
            Some(age),
            Some(gender),
            Some(city),
            Some(country_code),
            Some(state_province),
            Some(overall_place),
            Some(overall_time),
            Some(pace),
            Some(gender_place),
            Some(age_grade_time),
            Some(age_grade_place),
            Some(age_grade_percent),
            Some(races_count),
        ) = (
            present(self.first_name),
            self.age,
            self.gender,
            present(self.city),
            present(self.country_code),
            present(self.state_province),
            self.overall_place,
            present(self.overall_time),
            present(self.pace),
            self.gender_place,
            present(self.age_grade_time),
            self.age_grade_place,
            self.age_grade_percent,
            self.races_count,
        )
        else {
            return Ok(None);
        };

        let pace_minutes = parse_minutes(&pace)?;
        let region = if country_code == HOME_REGION {
            HOME_REGION
        } else {
            ABROAD_REGION
        };

        Ok(Some(RunnerRecord {
            age_group: bands.label_for(age).to_string(),
            region: region.to_string(),
            first_name,
            age,
            gender,
            city,
            country_code,
            state_province,
            overall_place,
            overall_time,
            pace,
            gender_place,
            age_grade_time,
            age_grade_place,
            age_grade_percent,
            races_count,
            pace_minutes,
        }))
    }
}

/// Column names and grid headers, in table order
pub const COLUMN_HEADERS: [(&str, &str); 17] = [
    ("firstName", "Runner Name"),
    ("age", "Age"),
    ("ageGroup", "Age Group"),
    ("gender", "Gender"),
    ("city", "City"),
    ("countryCode", "Country Code"),
    ("stateProvince", "State Province"),
    ("overallPlace", "Overall Place"),
    ("overallTime", "Overall Time"),
    ("pace", "Pace"),
    ("genderPlace", "Gender Place"),
    ("ageGradeTime", "Age Grade Time"),
    ("ageGradePlace", "Age Grade Place"),
    ("ageGradePercent", "Age Grade Percent"),
    ("racesCount", "Total Races Run"),
    ("paceMinutes", "Pace (Minutes)"),
    ("region", "Region"),
];

/// Arrow schema of the normalized runner table
#[must_use]
pub fn runner_schema() -> SchemaRef {
    let types = [
        DataType::Utf8,
        DataType::Int32,
        DataType::Utf8,
        DataType::Utf8,
        DataType::Utf8,
        DataType::Utf8,
        DataType::Utf8,
        DataType::Int64,
        DataType::Utf8,
        DataType::Utf8,
        DataType::Int64,
        DataType::Utf8,
        DataType::Int64,
        DataType::Float64,
        DataType::Int32,
        DataType::Float64,
        DataType::Utf8,
    ];
    let fields: Vec<Field> = COLUMN_HEADERS
        .iter()
        .zip(types)
        .map(|((name, _), data_type)| Field::new(*name, data_type, false))
        .collect();
    Arc::new(Schema::new(fields))
}

fn strings<F>(records: &[RunnerRecord], get: F) -> ArrayRef
where
    F: Fn(&RunnerRecord) -> &str,
{
    Arc::new(StringArray::from_iter_values(records.iter().map(get)))
}

/// Lay records out as one Arrow batch
///
/// # Errors
/// Returns error if Arrow rejects the batch
pub fn records_to_batch(records: &[RunnerRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        strings(records, |r| r.first_name.as_str()),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.age))),
        strings(records, |r| r.age_group.as_str()),
        strings(records, |r| r.gender.code()),
        strings(records, |r| r.city.as_str()),
        strings(records, |r| r.country_code.as_str()),
        strings(records, |r| r.state_province.as_str()),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.overall_place),
        )),
        strings(records, |r| r.overall_time.as_str()),
        strings(records, |r| r.pace.as_str()),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.gender_place),
        )),
        strings(records, |r| r.age_grade_time.as_str()),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.age_grade_place),
        )),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.age_grade_percent),
        )),
        Arc::new(Int32Array::from_iter_values(
            records.iter().map(|r| r.races_count),
        )),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.pace_minutes),
        )),
        strings(records, |r| r.region.as_str()),
    ];

    Ok(RecordBatch::try_new(runner_schema(), columns)?)
}
