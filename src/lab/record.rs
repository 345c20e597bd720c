//! Sample rows: text cleanup, date parsing and the Arrow layout

use crate::config::LabConfig;
use crate::expiration::{days_to_expire, ExpirationStatus};
use crate::storage;
use crate::Result;
use arrow::array::{ArrayRef, Date32Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::sync::Arc;

/// Chemicals reported by the lab
pub const CHEMICALS: [&str; 19] = [
    "DEHP_equivalents",
    "DEHP",
    "DBP",
    "BBP",
    "DINP",
    "DIDP",
    "DEP",
    "DMP",
    "DIBP",
    "DNHP",
    "DCHP",
    "DNOP",
    "BPA",
    "BPS",
    "BPF",
    "DEHT",
    "DEHA",
    "DINCH",
    "DIDA",
];

/// Units that reading columns are suffixed with
pub const UNITS: [&str; 8] = [
    "ng_g",
    "ng_serving",
    "percent_tdi_14_kg_epa",
    "percent_tdi_14_kg_efsa",
    "percent_tdi_70_kg_epa",
    "percent_tdi_70_kg_efsa",
    "percentile_ng_g",
    "percentile_ng_serving",
];

/// Source columns kept as text
pub const TEXT_COLUMNS: [&str; 8] = [
    "id",
    "product",
    "tags",
    "lot_no",
    "collected_at",
    "location_lat_lon",
    "latitude",
    "longitude",
];

/// Source columns parsed as dates
pub const DATE_COLUMNS: [&str; 5] = [
    "manufacturing_date",
    "expiration_date",
    "collected_on",
    "shipped_on",
    "arrived_at_lab_on",
];

/// Columns computed at load; ignored when present in the source
pub const DERIVED_COLUMNS: [&str; 7] = [
    "product_label",
    "tag_label",
    "lot_label",
    "collected_at_label",
    "shipping_time_days",
    "days_to_expire",
    "exp_status",
];

/// Placeholder lot for expired samples without a lot number
pub const NO_LOT: &str = "No Data";

/// Default label width in characters
pub const DEFAULT_LABEL_WIDTH: usize = 20;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Load options for the sample table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabOptions {
    /// Date that days-to-expire is measured from
    pub reference_date: NaiveDate,
    /// Characters kept in label columns
    pub label_width: usize,
}

impl LabOptions {
    /// Options with the default label width
    #[must_use]
    pub const fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            label_width: DEFAULT_LABEL_WIDTH,
        }
    }

    /// Set the label width
    #[must_use]
    pub const fn with_label_width(mut self, label_width: usize) -> Self {
        self.label_width = label_width;
        self
    }

    /// Options from configuration; an unset reference date means today
    #[must_use]
    pub fn from_config(config: &LabConfig) -> Self {
        Self::new(config.reference_date_or_today()).with_label_width(config.label_width)
    }
}

/// Parse a date cell. Datetimes keep their date part.
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            DATETIME_FORMATS.iter().find_map(|format| {
                NaiveDateTime::parse_from_str(text, format)
                    .ok()
                    .map(|dt| dt.date())
            })
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Replace missing cells with the last present value above them
#[must_use]
pub fn forward_fill<T: Copy>(cells: &[Option<T>]) -> Vec<Option<T>> {
    let mut last = None;
    cells
        .iter()
        .map(|cell| {
            if cell.is_some() {
                last = *cell;
            }
            last
        })
        .collect()
}

/// Underscores to spaces, then capitalize each run of letters
///
/// ```
/// use tally::lab::normalize_tags;
/// assert_eq!(normalize_tags("baby_food,DAIRY"), "Baby Food,Dairy");
/// ```
#[must_use]
pub fn normalize_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for ch in text.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// First `width` characters
#[must_use]
pub fn truncate_label(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Arrow schema of the sample table for a given set of reading columns
#[must_use]
pub fn sample_schema(reading_columns: &[String]) -> SchemaRef {
    let mut fields: Vec<Field> = TEXT_COLUMNS
        .iter()
        .chain(&DERIVED_COLUMNS[..4])
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    fields.extend(
        DATE_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Date32, true)),
    );
    fields.push(Field::new("shipping_time_days", DataType::Int64, true));
    fields.push(Field::new("days_to_expire", DataType::Int64, true));
    fields.push(Field::new("exp_status", DataType::Utf8, true));
    fields.extend(
        reading_columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true)),
    );
    Arc::new(Schema::new(fields))
}

/// Headers that hold chemical readings, in source order
#[must_use]
pub fn reading_columns(headers: &StringRecord) -> Vec<String> {
    headers
        .iter()
        .map(str::trim)
        .filter(|h| {
            !h.is_empty()
                && !TEXT_COLUMNS.contains(h)
                && !DATE_COLUMNS.contains(h)
                && !DERIVED_COLUMNS.contains(h)
        })
        .map(str::to_string)
        .collect()
}

/// Parsed samples plus load counters
#[derive(Debug)]
pub struct SampleBatch {
    /// The sample table
    pub batch: RecordBatch,
    /// Reading column names
    pub reading_columns: Vec<String>,
    /// Non-empty date cells that matched no format
    pub unparsed_dates: usize,
}

/// Lay raw CSV rows out as one Arrow batch with derived columns
///
/// # Errors
/// Returns error if Arrow rejects the batch
pub fn build_sample_batch(
    headers: &StringRecord,
    rows: &[StringRecord],
    options: &LabOptions,
) -> Result<SampleBatch> {
    let cells = |name: &str| -> Vec<Option<String>> {
        let index = headers.iter().position(|h| h.trim() == name);
        rows.iter()
            .map(|row| {
                index
                    .and_then(|i| row.get(i))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .collect()
    };
    let labels = |values: &[Option<String>]| -> Vec<Option<String>> {
        values
            .iter()
            .map(|v| v.as_deref().map(|s| truncate_label(s, options.label_width)))
            .collect()
    };

    let mut text: Vec<Vec<Option<String>>> = TEXT_COLUMNS.iter().map(|name| cells(name)).collect();
    text[2] = text[2]
        .iter()
        .map(|tags| tags.as_deref().map(normalize_tags))
        .collect();
    let derived_labels = [labels(&text[1]), labels(&text[2]), labels(&text[3]), labels(&text[4])];

    let mut unparsed_dates = 0;
    let dates: Vec<Vec<Option<NaiveDate>>> = DATE_COLUMNS
        .iter()
        .map(|name| {
            let parsed: Vec<Option<NaiveDate>> = cells(name)
                .iter()
                .map(|cell| {
                    cell.as_deref().and_then(|text| {
                        let date = parse_date(text);
                        if date.is_none() {
                            unparsed_dates += 1;
                        }
                        date
                    })
                })
                .collect();
            forward_fill(&parsed)
        })
        .collect();

    let (expiration, shipped, arrived) = (&dates[1], &dates[3], &dates[4]);
    let shipping_time: Vec<Option<i64>> = shipped
        .iter()
        .zip(arrived)
        .map(|(s, a)| Some((*a)?.signed_duration_since((*s)?).num_days()))
        .collect();
    let days: Vec<Option<i64>> = expiration
        .iter()
        .map(|e| e.map(|date| days_to_expire(date, options.reference_date)))
        .collect();
    let status: Vec<Option<&str>> = days
        .iter()
        .map(|d| d.and_then(|d| ExpirationStatus::classify(d).label()))
        .collect();

    let reading_columns = reading_columns(headers);

    let mut columns: Vec<ArrayRef> = Vec::new();
    for values in text.into_iter().chain(derived_labels) {
        columns.push(Arc::new(StringArray::from(values)));
    }
    for values in &dates {
        columns.push(Arc::new(Date32Array::from(
            values
                .iter()
                .map(|d| d.map(storage::date_to_days))
                .collect::<Vec<_>>(),
        )));
    }
    columns.push(Arc::new(Int64Array::from(shipping_time)));
    columns.push(Arc::new(Int64Array::from(days)));
    columns.push(Arc::new(StringArray::from(status)));
    for name in &reading_columns {
        columns.push(Arc::new(StringArray::from(cells(name))));
    }

    let batch = RecordBatch::try_new(sample_schema(&reading_columns), columns)?;
    Ok(SampleBatch {
        batch,
        reading_columns,
        unparsed_dates,
    })
}
