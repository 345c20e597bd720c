//! Query execution engine
//!
//! Executes [`GroupQuery`] plans against a [`Table`]. Grouping is a single
//! pass over the combined batch into ordered accumulators, so output order
//! is the ascending key order and repeated runs are bit-identical.

use super::{AggregateFunction, Aggregation, GroupQuery, OrderDirection, Predicate};
use crate::normalize::normalize;
use crate::storage::{self, Table};
use crate::topk::{SortOrder, TopKSelection};
use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array,
    RecordBatch, StringArray,
};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// A group key cell. Integers and dates compare numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum KeyValue {
    Int(i64),
    Text(String),
}

fn key_at(array: &ArrayRef, row: usize) -> Result<Option<KeyValue>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let any = array.as_any();
    let value = match array.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| KeyValue::Text(a.value(row).to_string())),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| KeyValue::Int(i64::from(a.value(row)))),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| KeyValue::Int(a.value(row))),
        DataType::Date32 => any
            .downcast_ref::<Date32Array>()
            .map(|a| KeyValue::Int(i64::from(a.value(row)))),
        dt => {
            return Err(Error::InvalidInput(format!(
                "Grouping not supported for data type: {dt:?}"
            )))
        }
    };
    value
        .map(Some)
        .ok_or_else(|| Error::Other("Failed to downcast key column".to_string()))
}

/// Numeric view of a cell. Text cells go through the reading normalizer, so
/// `<LOQ` counts as its sentinel and unrecognized text is skipped.
fn numeric_at(array: &ArrayRef, row: usize) -> Option<f64> {
    if array.is_null(row) {
        return None;
    }
    match array.data_type() {
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .and_then(|a| normalize(a.value(row)).value()),
        _ => storage::f64_at(array, row),
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum { sum: f64, n: usize },
    Avg { sum: f64, n: usize },
    Min(Option<f64>),
    Max(Option<f64>),
    Distinct(BTreeSet<KeyValue>),
}

impl Accumulator {
    fn new(func: AggregateFunction) -> Self {
        match func {
            AggregateFunction::Count => Self::Count(0),
            AggregateFunction::Sum => Self::Sum { sum: 0.0, n: 0 },
            AggregateFunction::Avg => Self::Avg { sum: 0.0, n: 0 },
            AggregateFunction::Min => Self::Min(None),
            AggregateFunction::Max => Self::Max(None),
            AggregateFunction::CountDistinct => Self::Distinct(BTreeSet::new()),
        }
    }

    fn update(&mut self, input: Option<&ArrayRef>, row: usize) -> Result<()> {
        match self {
            Self::Count(n) => {
                let counted = input.map_or(true, |array| !array.is_null(row));
                if counted {
                    *n += 1;
                }
            }
            Self::Sum { sum, n } | Self::Avg { sum, n } => {
                if let Some(v) = input.and_then(|array| numeric_at(array, row)) {
                    *sum += v;
                    *n += 1;
                }
            }
            Self::Min(current) => {
                if let Some(v) = input.and_then(|array| numeric_at(array, row)) {
                    *current = Some(current.map_or(v, |c| c.min(v)));
                }
            }
            Self::Max(current) => {
                if let Some(v) = input.and_then(|array| numeric_at(array, row)) {
                    *current = Some(current.map_or(v, |c| c.max(v)));
                }
            }
            Self::Distinct(seen) => {
                if let Some(array) = input {
                    if let Some(key) = key_at(array, row)? {
                        seen.insert(key);
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish_float(&self) -> Option<f64> {
        match self {
            Self::Sum { sum, .. } => Some(*sum),
            Self::Avg { sum, n } => (*n > 0).then(|| sum / *n as f64),
            Self::Min(v) | Self::Max(v) => *v,
            Self::Count(_) | Self::Distinct(_) => None,
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn finish_int(&self) -> i64 {
        match self {
            Self::Count(n) => *n,
            Self::Distinct(seen) => seen.len() as i64,
            _ => 0,
        }
    }
}

const fn output_type(func: AggregateFunction) -> DataType {
    match func {
        AggregateFunction::Count | AggregateFunction::CountDistinct => DataType::Int64,
        AggregateFunction::Sum
        | AggregateFunction::Avg
        | AggregateFunction::Min
        | AggregateFunction::Max => DataType::Float64,
    }
}

/// Query executor for group-by plans
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryExecutor {
    _private: (),
}

impl QueryExecutor {
    /// Create a new query executor
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Execute a query plan against a table
    ///
    /// # Returns
    /// A new record batch: key columns (input types) followed by aggregate
    /// columns (`Int64` for counts, `Float64` otherwise)
    ///
    /// # Errors
    /// Returns error if:
    /// - A referenced column is missing
    /// - A key column has an ungroupable type
    /// - The plan has neither keys nor aggregations
    ///
    /// # Example
    /// ```rust
    /// use arrow::array::{Int32Array, RecordBatch, StringArray};
    /// use arrow::datatypes::{DataType, Field, Schema};
    /// use std::sync::Arc;
    /// use tally::query::{GroupQuery, QueryExecutor};
    /// use tally::storage::Table;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schema = Arc::new(Schema::new(vec![
    ///     Field::new("gender", DataType::Utf8, false),
    ///     Field::new("age", DataType::Int32, false),
    /// ]));
    /// let batch = RecordBatch::try_new(
    ///     schema,
    ///     vec![
    ///         Arc::new(StringArray::from(vec!["W", "M", "W"])),
    ///         Arc::new(Int32Array::from(vec![30, 40, 50])),
    ///     ],
    /// )?;
    /// let table = Table::from_batch(batch);
    ///
    /// let query = GroupQuery::new(["gender"]).count("count").avg("age", "avgAge");
    /// let result = QueryExecutor::new().execute(&query, &table)?;
    /// assert_eq!(result.num_rows(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute(&self, query: &GroupQuery, table: &Table) -> Result<RecordBatch> {
        if query.group_by.is_empty() && query.aggregations.is_empty() {
            return Err(Error::InvalidInput(
                "Query needs group keys or aggregations".to_string(),
            ));
        }

        let combined = table.combined()?;
        let filtered = Self::apply_filters(&combined, &query.filters)?;
        let grouped = Self::execute_grouping(&filtered, query)?;
        let ordered = Self::apply_order_by_limit(&grouped, query)?;

        debug!(
            keys = ?query.group_by,
            input_rows = combined.num_rows(),
            filtered_rows = filtered.num_rows(),
            output_rows = ordered.num_rows(),
            "group query executed"
        );
        Ok(ordered)
    }

    /// Apply all filters as one mask
    ///
    /// # Errors
    /// Returns error if a filter column is missing or has the wrong type
    pub fn apply_filters(batch: &RecordBatch, filters: &[Predicate]) -> Result<RecordBatch> {
        if filters.is_empty() {
            return Ok(batch.clone());
        }

        let mut keep = vec![true; batch.num_rows()];
        for predicate in filters {
            Self::narrow_mask(batch, predicate, &mut keep)?;
        }

        compute::filter_record_batch(batch, &BooleanArray::from(keep))
            .map_err(|e| Error::StorageError(format!("Failed to apply filter: {e}")))
    }

    fn narrow_mask(batch: &RecordBatch, predicate: &Predicate, keep: &mut [bool]) -> Result<()> {
        match predicate {
            Predicate::InSet { column, values } => {
                let array = storage::utf8(batch, column)?;
                for (row, flag) in keep.iter_mut().enumerate() {
                    *flag &= storage::str_at(array, row).is_some_and(|v| values.contains(v));
                }
            }
            Predicate::Compare { column, op, value } => {
                let array = storage::column(batch, column)?;
                for (row, flag) in keep.iter_mut().enumerate() {
                    *flag &= storage::f64_at(array, row).is_some_and(|v| op.eval(v, *value));
                }
            }
            Predicate::NotNull(column) => {
                let array = storage::column(batch, column)?;
                for (row, flag) in keep.iter_mut().enumerate() {
                    *flag &= !array.is_null(row);
                }
            }
        }
        Ok(())
    }

    fn execute_grouping(batch: &RecordBatch, query: &GroupQuery) -> Result<RecordBatch> {
        let key_columns = query
            .group_by
            .iter()
            .map(|name| storage::column(batch, name).cloned())
            .collect::<Result<Vec<_>>>()?;

        let inputs = query
            .aggregations
            .iter()
            .map(|agg| Self::aggregation_input(batch, agg))
            .collect::<Result<Vec<_>>>()?;

        let mut groups: BTreeMap<Vec<KeyValue>, Vec<Accumulator>> = BTreeMap::new();

        'rows: for row in 0..batch.num_rows() {
            let mut key = Vec::with_capacity(key_columns.len());
            for array in &key_columns {
                match key_at(array, row)? {
                    Some(value) => key.push(value),
                    None => continue 'rows,
                }
            }

            let accumulators = groups.entry(key).or_insert_with(|| {
                query
                    .aggregations
                    .iter()
                    .map(|agg| Accumulator::new(agg.func))
                    .collect()
            });
            for (acc, input) in accumulators.iter_mut().zip(&inputs) {
                acc.update(input.as_ref(), row)?;
            }
        }

        // A global aggregate over zero rows still yields one row
        if query.group_by.is_empty() && groups.is_empty() {
            groups.insert(
                Vec::new(),
                query
                    .aggregations
                    .iter()
                    .map(|agg| Accumulator::new(agg.func))
                    .collect(),
            );
        }

        Self::build_output(batch, query, &key_columns, &groups)
    }

    fn aggregation_input(batch: &RecordBatch, agg: &Aggregation) -> Result<Option<ArrayRef>> {
        if agg.column == "*" {
            if agg.func == AggregateFunction::Count {
                return Ok(None);
            }
            return Err(Error::InvalidInput(format!(
                "{:?} needs a column, got *",
                agg.func
            )));
        }
        storage::column(batch, &agg.column).cloned().map(Some)
    }

    fn build_output(
        batch: &RecordBatch,
        query: &GroupQuery,
        key_columns: &[ArrayRef],
        groups: &BTreeMap<Vec<KeyValue>, Vec<Accumulator>>,
    ) -> Result<RecordBatch> {
        let schema = batch.schema();
        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();

        for (position, (name, source)) in query.group_by.iter().zip(key_columns).enumerate() {
            let data_type = source.data_type().clone();
            let cells = groups.keys().map(|key| &key[position]);
            let array: ArrayRef = match data_type {
                DataType::Utf8 => Arc::new(StringArray::from_iter_values(cells.map(|k| match k {
                    KeyValue::Text(s) => s.clone(),
                    KeyValue::Int(i) => i.to_string(),
                }))),
                DataType::Int64 => Arc::new(Int64Array::from_iter_values(cells.map(int_key))),
                DataType::Int32 => Arc::new(Int32Array::from_iter_values(
                    cells.map(|k| i32::try_from(int_key(k)).unwrap_or_default()),
                )),
                DataType::Date32 => Arc::new(Date32Array::from_iter_values(
                    cells.map(|k| i32::try_from(int_key(k)).unwrap_or_default()),
                )),
                dt => {
                    return Err(Error::InvalidInput(format!(
                        "Grouping not supported for data type: {dt:?}"
                    )))
                }
            };
            let nullable = schema
                .field_with_name(name)
                .map(|f| f.is_nullable())
                .unwrap_or(true);
            fields.push(Field::new(name, data_type, nullable));
            columns.push(array);
        }

        for (index, agg) in query.aggregations.iter().enumerate() {
            let data_type = output_type(agg.func);
            let array: ArrayRef = match data_type {
                DataType::Int64 => Arc::new(Int64Array::from_iter_values(
                    groups.values().map(|accs| accs[index].finish_int()),
                )),
                _ => Arc::new(Float64Array::from(
                    groups
                        .values()
                        .map(|accs| {
                            accs[index]
                                .finish_float()
                                .map(|v| query.round.map_or(v, |d| round_to(v, d)))
                        })
                        .collect::<Vec<_>>(),
                )),
            };
            fields.push(Field::new(&agg.alias, data_type, true));
            columns.push(array);
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .map_err(|e| Error::StorageError(format!("Failed to create result batch: {e}")))
    }

    /// Apply ORDER BY + LIMIT using Top-K selection
    fn apply_order_by_limit(batch: &RecordBatch, query: &GroupQuery) -> Result<RecordBatch> {
        let Some((col_name, direction)) = &query.order_by else {
            return Ok(match query.limit {
                Some(limit) => batch.slice(0, limit.min(batch.num_rows())),
                None => batch.clone(),
            });
        };

        let col_index = batch
            .schema()
            .index_of(col_name)
            .map_err(|_| Error::InvalidInput(format!("Column not found: {col_name}")))?;

        let sort_order = match direction {
            OrderDirection::Asc => SortOrder::Ascending,
            OrderDirection::Desc => SortOrder::Descending,
        };

        let k = query.limit.unwrap_or_else(|| batch.num_rows());
        if k == 0 || batch.num_rows() == 0 {
            return Ok(batch.slice(0, 0));
        }
        batch.top_k(col_index, k, sort_order)
    }
}

fn int_key(key: &KeyValue) -> i64 {
    match key {
        KeyValue::Int(i) => *i,
        KeyValue::Text(_) => 0,
    }
}

#[allow(clippy::cast_possible_wrap)]
fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}
