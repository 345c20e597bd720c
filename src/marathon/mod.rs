//! Race results dataset
//!
//! Loads a runner results CSV once into an immutable [`RunnerTable`] and
//! answers the dashboard's questions against it: headline counts, runners
//! and pace by age, age-group breakdowns, top countries and most-raced
//! runners. Every method returns a fresh batch; the table never changes.
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use tally::bands::AgeBands;
//! use tally::marathon::{Gender, RunnerTable};
//!
//! # fn main() -> tally::Result<()> {
//! let runners = RunnerTable::load_csv("data/nyc_marathon_2024.csv", &AgeBands::default())?;
//! let women = BTreeSet::from([Gender::W]);
//! let by_group = runners.age_group_counts(&women)?;
//! println!("{} age groups", by_group.num_rows());
//! # Ok(())
//! # }
//! ```

mod record;

pub use record::{
    records_to_batch, runner_schema, Gender, RawRunner, RunnerRecord, ABROAD_REGION,
    COLUMN_HEADERS, HOME_REGION,
};

use crate::bands::AgeBands;
use crate::query::{GroupQuery, OrderDirection, Predicate, QueryExecutor};
use crate::storage::{self, Table};
use crate::topk::{distinct_head, SortOrder, TopKSelection};
use crate::{Error, Result};
use arrow::array::{Array, RecordBatch};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Headline counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RaceSummary {
    /// Runners after dropping incomplete rows
    pub runners: usize,
    /// Distinct country codes
    pub nationalities: usize,
    /// Runners with gender M
    pub men: usize,
    /// Runners with gender W
    pub women: usize,
}

/// Grid column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Table column name
    pub field: &'static str,
    /// Display header
    pub header_name: &'static str,
}

/// Grid column definitions for the normalized runner table
#[must_use]
pub fn column_defs() -> Vec<ColumnDef> {
    COLUMN_HEADERS
        .iter()
        .map(|&(field, header_name)| ColumnDef { field, header_name })
        .collect()
}

/// Immutable runner table
#[derive(Debug, Clone)]
pub struct RunnerTable {
    table: Table,
    dropped_rows: usize,
    executor: QueryExecutor,
}

impl RunnerTable {
    /// Load runners from a CSV file
    ///
    /// # Errors
    /// Returns error if the file can't be read or a pace is malformed
    pub fn load_csv(path: impl AsRef<Path>, bands: &AgeBands) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            Error::StorageError(format!("Failed to open {}: {e}", path.display()))
        })?;
        let table = Self::from_reader(file, bands)?;
        info!(
            path = %path.display(),
            rows = table.num_rows(),
            dropped = table.dropped_rows,
            "runner table loaded"
        );
        Ok(table)
    }

    /// Load runners from any CSV source with a header row.
    ///
    /// Rows missing a retained field are dropped and counted; a malformed
    /// pace aborts the load.
    ///
    /// # Errors
    /// Returns error on CSV framing errors or malformed pace text
    pub fn from_reader<R: Read>(reader: R, bands: &AgeBands) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut records = Vec::new();
        let mut dropped_rows = 0;

        for (row, raw) in csv_reader.deserialize::<RawRunner>().enumerate() {
            match raw?.into_record(bands) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => dropped_rows += 1,
                Err(Error::ParseError(msg)) => {
                    return Err(Error::ParseError(format!("row {}: {msg}", row + 1)));
                }
                Err(e) => return Err(e),
            }
        }

        if dropped_rows > 0 {
            warn!(dropped_rows, "dropped runner rows with missing fields");
        }
        Self::from_records(&records, dropped_rows)
    }

    /// Build a table from already validated records
    ///
    /// # Errors
    /// Returns error if Arrow rejects the batch
    pub fn from_records(records: &[RunnerRecord], dropped_rows: usize) -> Result<Self> {
        let batch = records_to_batch(records)?;
        Ok(Self {
            table: Table::from_batch(batch),
            dropped_rows,
            executor: QueryExecutor::new(),
        })
    }

    /// Underlying table
    #[must_use]
    pub const fn table(&self) -> &Table {
        &self.table
    }

    /// Rows kept
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// Rows dropped at load for missing fields
    #[must_use]
    pub const fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// Headline counts
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn summary(&self) -> Result<RaceSummary> {
        let batch = self.table.combined()?;
        let countries = storage::utf8(&batch, "countryCode")?;
        let genders = storage::utf8(&batch, "gender")?;

        let nationalities: HashSet<&str> = (0..countries.len())
            .filter_map(|row| storage::str_at(countries, row))
            .collect();
        let count_gender = |code: &str| {
            (0..genders.len())
                .filter(|&row| storage::str_at(genders, row) == Some(code))
                .count()
        };

        Ok(RaceSummary {
            runners: batch.num_rows(),
            nationalities: nationalities.len(),
            men: count_gender(Gender::M.code()),
            women: count_gender(Gender::W.code()),
        })
    }

    /// Runners per (age, gender, region). An empty gender set means M and W.
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn runners_by_age(&self, genders: &BTreeSet<Gender>) -> Result<RecordBatch> {
        let query = GroupQuery::new(["age", "gender", "region"])
            .filter(binary_gender_filter(genders))
            .count("count");
        self.executor.execute(&query, &self.table)
    }

    /// Mean pace per (age, gender, region). An empty gender set means M and W.
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn avg_pace_by_age(&self, genders: &BTreeSet<Gender>) -> Result<RecordBatch> {
        let query = GroupQuery::new(["age", "gender", "region"])
            .filter(binary_gender_filter(genders))
            .avg("paceMinutes", "avgPace")
            .round(2);
        self.executor.execute(&query, &self.table)
    }

    /// Runners per (age group, gender)
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn age_group_counts(&self, genders: &BTreeSet<Gender>) -> Result<RecordBatch> {
        let query = with_gender_filter(GroupQuery::new(["ageGroup", "gender"]), genders)
            .count("count");
        self.executor.execute(&query, &self.table)
    }

    /// Mean pace per (age group, gender), rounded to 2 places
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn avg_pace_by_age_group(&self, genders: &BTreeSet<Gender>) -> Result<RecordBatch> {
        let query = with_gender_filter(GroupQuery::new(["ageGroup", "gender"]), genders)
            .avg("paceMinutes", "avgPace")
            .round(2);
        self.executor.execute(&query, &self.table)
    }

    /// Runner counts per (country, gender) for the `n` countries with the
    /// largest single (country, gender) count.
    ///
    /// Countries are chosen across all genders; the gender filter applies
    /// to the chosen rows afterwards.
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn top_countries(&self, n: usize, genders: &BTreeSet<Gender>) -> Result<RecordBatch> {
        let query = GroupQuery::new(["countryCode", "gender"])
            .count("count")
            .order_by("count", OrderDirection::Desc);
        let ranked = self.executor.execute(&query, &self.table)?;
        let leaders = distinct_head(storage::utf8(&ranked, "countryCode")?, n);

        let mut filters = vec![Predicate::in_set("countryCode", leaders)];
        filters.extend(gender_predicate(genders));
        QueryExecutor::apply_filters(&ranked, &filters)
    }

    /// The `n` runners with the most races, then the gender filter
    ///
    /// # Errors
    /// Returns error if `n` is zero or the table layout is corrupt
    pub fn top_runners_by_races(
        &self,
        n: usize,
        genders: &BTreeSet<Gender>,
    ) -> Result<RecordBatch> {
        let batch = self.table.combined()?;
        let schema = batch.schema();
        let projection = ["firstName", "racesCount", "gender"]
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let projected = batch.project(&projection)?;

        if projected.num_rows() == 0 {
            return Ok(projected);
        }
        let top = projected.top_k(1, n, SortOrder::Descending)?;
        let filters: Vec<Predicate> = gender_predicate(genders).into_iter().collect();
        QueryExecutor::apply_filters(&top, &filters)
    }

    /// The normalized table as CSV bytes
    ///
    /// # Errors
    /// Returns error if Arrow fails to write
    pub fn export_csv(&self) -> Result<Vec<u8>> {
        self.table.to_csv_bytes()
    }
}

fn gender_predicate(genders: &BTreeSet<Gender>) -> Option<Predicate> {
    (!genders.is_empty())
        .then(|| Predicate::in_set("gender", genders.iter().map(|g| g.code())))
}

fn with_gender_filter(query: GroupQuery, genders: &BTreeSet<Gender>) -> GroupQuery {
    match gender_predicate(genders) {
        Some(predicate) => query.filter(predicate),
        None => query,
    }
}

fn binary_gender_filter(genders: &BTreeSet<Gender>) -> Predicate {
    if genders.is_empty() {
        Predicate::in_set("gender", [Gender::M.code(), Gender::W.code()])
    } else {
        Predicate::in_set("gender", genders.iter().map(|g| g.code()))
    }
}
