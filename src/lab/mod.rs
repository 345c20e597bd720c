//! Lab sample dataset
//!
//! Loads a sample export (one row per tested product sample) into an
//! immutable [`LabTable`]. Dates are parsed and forward-filled, tags are
//! cleaned, labels truncated, and expiry fields derived against a fixed
//! reference date at load. Chemical readings stay raw text until a caller
//! asks for them, at which point each cell goes through
//! [`normalize`](crate::normalize::normalize).

mod record;

pub use record::{
    build_sample_batch, forward_fill, normalize_tags, parse_date, reading_columns,
    sample_schema, truncate_label, LabOptions, SampleBatch, CHEMICALS, DATE_COLUMNS,
    DEFAULT_LABEL_WIDTH, DERIVED_COLUMNS, NO_LOT, TEXT_COLUMNS, UNITS,
};

use crate::expiration::ExpirationStatus;
use crate::normalize::{normalize, Reading};
use crate::query::{CompareOp, GroupQuery, OrderDirection, Predicate, QueryExecutor};
use crate::storage::{self, Table};
use crate::topk::{distinct_head, SortOrder, TopKSelection};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Stage of a sample's journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimelineStage {
    /// Manufacturing date to collection date
    #[serde(rename = "Manufacturing to Collection")]
    ManufacturingToCollection,
    /// Collection date to shipping date
    #[serde(rename = "Collection to Shipment")]
    CollectionToShipment,
    /// Shipping date to lab arrival
    #[serde(rename = "Shipment to Arrival")]
    ShipmentToArrival,
}

impl TimelineStage {
    /// Stages in journey order
    pub const ALL: [Self; 3] = [
        Self::ManufacturingToCollection,
        Self::CollectionToShipment,
        Self::ShipmentToArrival,
    ];

    /// Legend label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ManufacturingToCollection => "Manufacturing to Collection",
            Self::CollectionToShipment => "Collection to Shipment",
            Self::ShipmentToArrival => "Shipment to Arrival",
        }
    }

    const fn bounds(self) -> (&'static str, &'static str) {
        match self {
            Self::ManufacturingToCollection => ("manufacturing_date", "collected_on"),
            Self::CollectionToShipment => ("collected_on", "shipped_on"),
            Self::ShipmentToArrival => ("shipped_on", "arrived_at_lab_on"),
        }
    }
}

/// One bar of the product timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineSpan {
    /// Product label
    pub task: Option<String>,
    /// Stage start
    pub start: Option<NaiveDate>,
    /// Stage end
    pub finish: Option<NaiveDate>,
    /// Stage
    pub stage: TimelineStage,
}

/// Samples counted on one date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    /// Calendar date
    pub date: NaiveDate,
    /// Samples with this date
    pub count: i64,
}

/// Daily counts for one shipment milestone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendSeries {
    /// Series name
    pub name: &'static str,
    /// Points in ascending date order
    pub points: Vec<TrendPoint>,
}

/// One chemical's reading for a sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChemicalResult {
    /// Column name with the unit suffix removed
    pub chemical: String,
    /// Raw cell text
    pub label: Option<String>,
    /// Normalized reading
    pub reading: Option<Reading>,
}

/// Immutable sample table
#[derive(Debug, Clone)]
pub struct LabTable {
    table: Table,
    reading_columns: Vec<String>,
    options: LabOptions,
    executor: QueryExecutor,
}

impl LabTable {
    /// Load samples from a CSV file
    ///
    /// # Errors
    /// Returns error if the file can't be read or isn't valid CSV
    pub fn load_csv(path: impl AsRef<Path>, options: LabOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            Error::StorageError(format!("Failed to open {}: {e}", path.display()))
        })?;
        let table = Self::from_reader(file, options)?;
        info!(
            path = %path.display(),
            rows = table.num_rows(),
            readings = table.reading_columns.len(),
            reference_date = %options.reference_date,
            "sample table loaded"
        );
        Ok(table)
    }

    /// Load samples from any CSV source with a header row
    ///
    /// # Errors
    /// Returns error on CSV framing errors
    pub fn from_reader<R: Read>(reader: R, options: LabOptions) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let rows = csv_reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let samples = build_sample_batch(&headers, &rows, &options)?;
        if samples.unparsed_dates > 0 {
            warn!(
                unparsed_dates = samples.unparsed_dates,
                "unparseable dates replaced by the previous row's date"
            );
        }

        Ok(Self {
            table: Table::from_batch(samples.batch),
            reading_columns: samples.reading_columns,
            options,
            executor: QueryExecutor::new(),
        })
    }

    /// Underlying table
    #[must_use]
    pub const fn table(&self) -> &Table {
        &self.table
    }

    /// Rows loaded
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// Chemical reading columns, in source order
    #[must_use]
    pub fn reading_columns(&self) -> &[String] {
        &self.reading_columns
    }

    /// Options the table was loaded with
    #[must_use]
    pub const fn options(&self) -> &LabOptions {
        &self.options
    }

    /// Most frequent tags across comma-separated tag lists.
    ///
    /// Columns `tag`, `count`; count ties keep first-seen order.
    ///
    /// # Errors
    /// Returns error if `n` is zero or the table layout is corrupt
    pub fn top_tags(&self, n: usize) -> Result<RecordBatch> {
        if n == 0 {
            return Err(Error::InvalidInput("n must be greater than 0".to_string()));
        }
        let batch = self.table.combined()?;
        let tags = storage::utf8(&batch, "tags")?;

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in 0..tags.len() {
            let Some(list) = storage::str_at(tags, row) else {
                continue;
            };
            for tag in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let count = counts.entry(tag.to_string()).or_insert_with(|| {
                    order.push(tag.to_string());
                    0
                });
                *count += 1;
            }
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("tag", DataType::Utf8, false),
            Field::new("count", DataType::Int64, false),
        ]));
        let totals: Vec<i64> = order.iter().map(|tag| counts[tag]).collect();
        let tally = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from_iter_values(&order)),
                Arc::new(Int64Array::from(totals)),
            ],
        )?;

        if tally.num_rows() == 0 {
            return Ok(tally);
        }
        tally.top_k(1, n, SortOrder::Descending)
    }

    /// Lots with the given status, longest shelf life first.
    ///
    /// Rows without a lot number or product are skipped.
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn expiration_risk(&self, status: ExpirationStatus) -> Result<RecordBatch> {
        let mut filters = vec![Predicate::not_null("lot_no"), Predicate::not_null("product")];
        match status.label() {
            Some(label) => filters.push(Predicate::in_set("exp_status", [label])),
            None => filters.push(Predicate::compare("days_to_expire", CompareOp::Gt, 180.0)),
        }

        let batch = self.table.combined()?;
        let filtered = QueryExecutor::apply_filters(&batch, &filters)?;
        let schema = filtered.schema();
        let projection = ["lot_label", "product", "product_label", "days_to_expire", "exp_status"]
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let projected = filtered.project(&projection)?;

        if projected.num_rows() == 0 {
            return Ok(projected);
        }
        projected.top_k(3, projected.num_rows(), SortOrder::Descending)
    }

    /// Unexpired samples per tag label, fewest first
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn expiring_by_tags(&self) -> Result<RecordBatch> {
        let query = GroupQuery::new(["tag_label"])
            .filter(Predicate::compare("days_to_expire", CompareOp::Ge, 0.0))
            .count("count")
            .order_by("count", OrderDirection::Asc);
        self.executor.execute(&query, &self.table)
    }

    /// Distinct expired lots per (tag label, product label), limited to the
    /// `n` tags with the most expired lots in total.
    ///
    /// Expired samples without a lot number count as one [`NO_LOT`] lot.
    ///
    /// # Errors
    /// Returns error if `n` is zero or the table layout is corrupt
    pub fn expired_lots_by_tags(&self, n: usize) -> Result<RecordBatch> {
        if n == 0 {
            return Err(Error::InvalidInput("n must be greater than 0".to_string()));
        }

        let batch = self.table.combined()?;
        let expired = QueryExecutor::apply_filters(
            &batch,
            &[Predicate::compare("days_to_expire", CompareOp::Lt, 0.0)],
        )?;
        let lots = storage::utf8(&expired, "lot_no")?;
        let filled: StringArray = lots.iter().map(|lot| Some(lot.unwrap_or(NO_LOT))).collect();

        let schema = Arc::new(Schema::new(vec![
            Field::new("tag_label", DataType::Utf8, true),
            Field::new("product_label", DataType::Utf8, true),
            Field::new("lot", DataType::Utf8, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            storage::column(&expired, "tag_label")?.clone(),
            storage::column(&expired, "product_label")?.clone(),
            Arc::new(filled),
        ];
        let lots_table = Table::from_batch(RecordBatch::try_new(schema, columns)?);

        let per_product = self.executor.execute(
            &GroupQuery::new(["tag_label", "product_label"]).count_distinct("lot", "lotCount"),
            &lots_table,
        )?;
        let per_tag = self.executor.execute(
            &GroupQuery::new(["tag_label"])
                .sum("lotCount", "lotCount")
                .order_by("lotCount", OrderDirection::Desc)
                .limit(n),
            &Table::from_batch(per_product.clone()),
        )?;
        let leaders = distinct_head(storage::utf8(&per_tag, "tag_label")?, n);

        QueryExecutor::apply_filters(&per_product, &[Predicate::in_set("tag_label", leaders)])
    }

    /// Samples per (tags, product, lot number), most first
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn tag_product_lot_counts(&self) -> Result<RecordBatch> {
        let query = GroupQuery::new(["tags", "product", "lot_no"])
            .count("count")
            .order_by("count", OrderDirection::Desc);
        self.executor.execute(&query, &self.table)
    }

    /// Daily sample counts for collection, shipping and lab arrival
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn shipment_trends(&self) -> Result<Vec<TrendSeries>> {
        [
            ("Collected", "collected_on"),
            ("Shipped", "shipped_on"),
            ("Arrived", "arrived_at_lab_on"),
        ]
        .into_iter()
        .map(|(name, column)| -> Result<TrendSeries> {
            let daily = self
                .executor
                .execute(&GroupQuery::new([column]).count("count"), &self.table)?;
            let dates = storage::date32(&daily, column)?;
            let counts = storage::int64(&daily, "count")?;
            let points = (0..daily.num_rows())
                .filter_map(|row| {
                    storage::date_at(dates, row).map(|date| TrendPoint {
                        date,
                        count: counts.value(row),
                    })
                })
                .collect();
            Ok(TrendSeries { name, points })
        })
        .collect()
    }

    /// Three stage spans per sample, in row order
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn product_timeline(&self) -> Result<Vec<TimelineSpan>> {
        let batch = self.table.combined()?;
        let tasks = storage::utf8(&batch, "product_label")?;
        let mut spans = Vec::with_capacity(batch.num_rows() * TimelineStage::ALL.len());

        let stage_dates = TimelineStage::ALL
            .iter()
            .map(|stage| -> Result<_> {
                let (start, finish) = stage.bounds();
                Ok((
                    *stage,
                    storage::date32(&batch, start)?,
                    storage::date32(&batch, finish)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            let task = storage::str_at(tasks, row).map(str::to_string);
            for (stage, start, finish) in &stage_dates {
                spans.push(TimelineSpan {
                    task: task.clone(),
                    start: storage::date_at(start, row),
                    finish: storage::date_at(finish, row),
                    stage: *stage,
                });
            }
        }
        Ok(spans)
    }

    /// Distinct products, first appearance order
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn products(&self) -> Result<Vec<String>> {
        let batch = self.table.combined()?;
        Ok(distinct_head(storage::utf8(&batch, "product")?, usize::MAX))
    }

    /// Distinct sample ids for a product, first appearance order
    ///
    /// # Errors
    /// Returns error if the table layout is corrupt
    pub fn sample_ids(&self, product: &str) -> Result<Vec<String>> {
        let matching = self.rows_for_product(product)?;
        Ok(distinct_head(storage::utf8(&matching, "id")?, usize::MAX))
    }

    /// Readings in `unit` for one sample.
    ///
    /// Uses every reading column whose name contains `unit`, strips the
    /// `_{unit}` suffix, then drops percentile columns. When several rows
    /// share the product and id, the first is used.
    ///
    /// # Errors
    /// Returns [`Error::MissingData`] if no sample matches `product` and `id`
    pub fn test_results(&self, product: &str, id: &str, unit: &str) -> Result<Vec<ChemicalResult>> {
        let matching = QueryExecutor::apply_filters(
            &self.rows_for_product(product)?,
            &[Predicate::in_set("id", [id])],
        )?;
        if matching.num_rows() == 0 {
            return Err(Error::MissingData(format!(
                "No sample with product {product:?} and id {id:?}"
            )));
        }

        let suffix = format!("_{unit}");
        let mut results = Vec::new();
        for column in self.reading_columns.iter().filter(|c| c.contains(unit)) {
            let chemical = column.replace(&suffix, "");
            if chemical.to_lowercase().contains("percentile") {
                continue;
            }
            let label = storage::str_at(storage::utf8(&matching, column)?, 0).map(str::to_string);
            results.push(ChemicalResult {
                chemical,
                reading: label.as_deref().map(normalize),
                label,
            });
        }
        Ok(results)
    }

    /// The normalized table as CSV bytes
    ///
    /// # Errors
    /// Returns error if Arrow fails to write
    pub fn export_csv(&self) -> Result<Vec<u8>> {
        self.table.to_csv_bytes()
    }

    fn rows_for_product(&self, product: &str) -> Result<RecordBatch> {
        QueryExecutor::apply_filters(
            &self.table.combined()?,
            &[Predicate::in_set("product", [product])],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
id,product,tags,lot_no,manufacturing_date,expiration_date,collected_on,shipped_on,arrived_at_lab_on,DEHP_ng_g,BPA_ng_g,DEHP_percentile_ng_g,DEHP_ng_serving
101,Organic Broccoli Florets,fresh_produce,L1,2024-10-01,2024-12-20,2024-11-01,2024-11-03,2024-11-06,<LOQ,12.5,40,3
102,Organic Broccoli Florets,fresh_produce,L2,2024-10-02,2025-01-10,2024-11-02,2024-11-04,2024-11-06,42,NO RfD,55,7
201,Whole Milk,\"dairy,fresh_produce\",,2024-09-15,2024-12-25,2024-11-02,2024-11-05,2024-11-09,<5,abc,10,1
301,Cheddar,dairy,C9,2024-08-01,2025-03-01,2024-11-05,,2024-11-10,3.5,1.2.3,20,2
401,Cheddar,dairy,C10,2024-08-01,2025-12-01,2024-11-05,2024-11-06,2024-11-10,1,1,1,1
";

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn table() -> LabTable {
        LabTable::from_reader(CSV.as_bytes(), LabOptions::new(reference())).unwrap()
    }

    fn texts(batch: &RecordBatch, column: &str) -> Vec<String> {
        let array = storage::utf8(batch, column).unwrap();
        (0..array.len()).map(|i| array.value(i).to_string()).collect()
    }

    fn ints(batch: &RecordBatch, column: &str) -> Vec<i64> {
        storage::int64(batch, column).unwrap().values().to_vec()
    }

    #[test]
    fn test_load() {
        let lab = table();
        assert_eq!(lab.num_rows(), 5);
        assert_eq!(
            lab.reading_columns(),
            ["DEHP_ng_g", "BPA_ng_g", "DEHP_percentile_ng_g", "DEHP_ng_serving"]
        );
    }

    #[test]
    fn test_top_tags() {
        let top = table().top_tags(15).unwrap();
        // tied counts keep first-seen order
        assert_eq!(texts(&top, "tag"), vec!["Fresh Produce", "Dairy"]);
        assert_eq!(ints(&top, "count"), vec![3, 3]);

        let one = table().top_tags(1).unwrap();
        assert_eq!(texts(&one, "tag"), vec!["Fresh Produce"]);
    }

    #[test]
    fn test_expiration_risk() {
        let lab = table();
        // Milk is expired too but has no lot number
        let expired = lab.expiration_risk(ExpirationStatus::Expired).unwrap();
        assert_eq!(texts(&expired, "lot_label"), vec!["L1"]);
        assert_eq!(ints(&expired, "days_to_expire"), vec![-12]);

        let critical = lab.expiration_risk(ExpirationStatus::Critical).unwrap();
        assert_eq!(texts(&critical, "lot_label"), vec!["L2"]);

        let beyond = lab.expiration_risk(ExpirationStatus::NoStatus).unwrap();
        assert_eq!(texts(&beyond, "lot_label"), vec!["C10"]);
        assert!(storage::utf8(&beyond, "exp_status").unwrap().is_null(0));
    }

    #[test]
    fn test_expiring_by_tags() {
        let batch = table().expiring_by_tags().unwrap();
        assert_eq!(texts(&batch, "tag_label"), vec!["Fresh Produce", "Dairy"]);
        assert_eq!(ints(&batch, "count"), vec![1, 2]);
    }

    #[test]
    fn test_expired_lots_by_tags() {
        let batch = table().expired_lots_by_tags(10).unwrap();
        assert_eq!(
            texts(&batch, "tag_label"),
            vec!["Dairy,Fresh Produce", "Fresh Produce"]
        );
        assert_eq!(texts(&batch, "product_label"), vec!["Whole Milk", "Organic Broccoli Flo"]);
        assert_eq!(ints(&batch, "lotCount"), vec![1, 1]);

        let one = table().expired_lots_by_tags(1).unwrap();
        assert_eq!(one.num_rows(), 1);
        assert!(table().expired_lots_by_tags(0).is_err());
    }

    #[test]
    fn test_tag_product_lot_counts_skip_missing_lots() {
        let batch = table().tag_product_lot_counts().unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert!(!texts(&batch, "product").contains(&"Whole Milk".to_string()));
    }

    #[test]
    fn test_shipment_trends() {
        let series = table().shipment_trends().unwrap();
        let names: Vec<_> = series.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Collected", "Shipped", "Arrived"]);

        let arrived = &series[2].points;
        assert_eq!(arrived.len(), 3);
        assert_eq!(arrived[0].date, NaiveDate::from_ymd_opt(2024, 11, 6).unwrap());
        assert_eq!(arrived[0].count, 2);

        // Cheddar's missing shipped date is filled from the row above
        let shipped = &series[1].points;
        assert_eq!(shipped.iter().map(|p| p.count).sum::<i64>(), 5);
        assert_eq!(shipped[2].count, 2);
    }

    #[test]
    fn test_product_timeline() {
        let spans = table().product_timeline().unwrap();
        assert_eq!(spans.len(), 15);
        assert_eq!(spans[0].stage, TimelineStage::ManufacturingToCollection);
        assert_eq!(spans[2].stage.label(), "Shipment to Arrival");
        assert_eq!(spans[2].task.as_deref(), Some("Organic Broccoli Flo"));
        assert_eq!(spans[1].finish, NaiveDate::from_ymd_opt(2024, 11, 3));
    }

    #[test]
    fn test_sample_ids_in_first_seen_order() {
        let lab = table();
        assert_eq!(lab.sample_ids("Cheddar").unwrap(), vec!["301", "401"]);
        assert!(lab.sample_ids("Tofu").unwrap().is_empty());
        assert_eq!(lab.products().unwrap().len(), 3);
    }

    #[test]
    fn test_test_results() {
        let lab = table();
        let results = lab.test_results("Organic Broccoli Florets", "101", "ng_g").unwrap();
        let chemicals: Vec<_> = results.iter().map(|r| r.chemical.as_str()).collect();
        assert_eq!(chemicals, vec!["DEHP", "BPA"]);
        assert_eq!(results[0].reading, Some(Reading::BelowDetectionLimit));
        assert_eq!(results[1].reading, Some(Reading::Numeric(12.5)));
        assert_eq!(results[0].label.as_deref(), Some("<LOQ"));

        let percentile = lab
            .test_results("Organic Broccoli Florets", "102", "percentile_ng_g")
            .unwrap();
        assert_eq!(percentile[0].chemical, "DEHP");
        assert_eq!(percentile[0].reading, Some(Reading::Numeric(55.0)));

        let milk = lab.test_results("Whole Milk", "201", "ng_g").unwrap();
        assert_eq!(milk[1].reading, Some(Reading::RawText("abc".to_string())));
    }

    #[test]
    fn test_results_for_unknown_sample() {
        let err = table().test_results("Whole Milk", "999", "ng_g").unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
    }
}
