//! Storage backend (Arrow)
//!
//! **Load-Once Design**:
//! - A table is built from record batches once, at load time
//! - After construction it is read-only; aggregations return new batches
//! - `Table` is `Send + Sync`, so one handle can serve concurrent readers
//!
//! CSV is the only interchange format: [`Table::to_csv_bytes`] exports the
//! normalized table and [`Table::from_csv_bytes`] reads an export back.

use crate::{Error, Result};
use arrow::array::{
    Array, ArrayRef, Date32Array, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
};
use arrow::compute;
use arrow::datatypes::{DataType, SchemaRef};
use chrono::NaiveDate;
use std::io::Cursor;
use std::sync::Arc;

/// Immutable columnar table
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Arc<[RecordBatch]>,
}

impl Table {
    /// Create a table from existing batches.
    ///
    /// # Errors
    ///
    /// Returns error if a batch schema doesn't match `schema`
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for batch in &batches {
            if batch.schema() != schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    schema,
                    batch.schema()
                )));
            }
        }

        Ok(Self {
            schema,
            batches: batches.into(),
        })
    }

    /// Create a table holding a single batch
    #[must_use]
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch].into(),
        }
    }

    /// Table schema
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Whether the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// All batches as one batch
    ///
    /// # Errors
    /// Returns error if Arrow fails to concatenate
    pub fn combined(&self) -> Result<RecordBatch> {
        if self.batches.len() == 1 {
            return Ok(self.batches[0].clone());
        }

        compute::concat_batches(&self.schema, self.batches.iter())
            .map_err(|e| Error::StorageError(format!("Failed to combine batches: {e}")))
    }

    /// Serialize the whole table as CSV with a header row
    ///
    /// # Errors
    /// Returns error if a column type cannot be written as CSV
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .build(Vec::new());

        for batch in self.batches.iter() {
            writer.write(batch)?;
        }

        Ok(writer.into_inner())
    }

    /// Read CSV produced by [`Table::to_csv_bytes`] back into a table
    ///
    /// # Errors
    /// Returns error if the bytes don't match `schema`
    pub fn from_csv_bytes(schema: SchemaRef, bytes: &[u8]) -> Result<Self> {
        let reader = arrow::csv::ReaderBuilder::new(Arc::clone(&schema))
            .with_header(true)
            .build(Cursor::new(bytes))?;

        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(schema, batches)
    }
}

// ---------------------------------------------------------------------------
// Typed column access
// ---------------------------------------------------------------------------

/// Look up a column by name
///
/// # Errors
/// Returns error if the column doesn't exist
pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::InvalidInput(format!("Column not found: {name}")))
}

fn downcast<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    expected: &str,
) -> Result<&'a T> {
    let array = column(batch, name)?;
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::InvalidInput(format!(
            "Column {name} is {:?}, expected {expected}",
            array.data_type()
        ))
    })
}

/// Borrow a Utf8 column
///
/// # Errors
/// Returns error if missing or not Utf8
pub fn utf8<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    downcast(batch, name, "Utf8")
}

/// Borrow an Int32 column
///
/// # Errors
/// Returns error if missing or not Int32
pub fn int32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    downcast(batch, name, "Int32")
}

/// Borrow an Int64 column
///
/// # Errors
/// Returns error if missing or not Int64
pub fn int64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    downcast(batch, name, "Int64")
}

/// Borrow a Float64 column
///
/// # Errors
/// Returns error if missing or not Float64
pub fn float64<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    downcast(batch, name, "Float64")
}

/// Borrow a Date32 column
///
/// # Errors
/// Returns error if missing or not Date32
pub fn date32<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Date32Array> {
    downcast(batch, name, "Date32")
}

/// Optional string cell
#[must_use]
pub fn str_at(array: &StringArray, row: usize) -> Option<&str> {
    (!array.is_null(row)).then(|| array.value(row))
}

/// Numeric cell widened to `f64`, `None` for nulls and non-numeric types.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn f64_at(array: &ArrayRef, row: usize) -> Option<f64> {
    if array.is_null(row) {
        return None;
    }
    match array.data_type() {
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| f64::from(a.value(row))),
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row) as f64),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(row)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Date32 conversion
// ---------------------------------------------------------------------------

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Days since the Unix epoch, the Arrow `Date32` encoding
#[must_use]
pub fn date_to_days(date: NaiveDate) -> i32 {
    i32::try_from((date - unix_epoch()).num_days()).unwrap_or(i32::MAX)
}

/// Inverse of [`date_to_days`]
#[must_use]
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    unix_epoch().checked_add_signed(chrono::Duration::days(i64::from(days)))
}

/// Optional date cell
#[must_use]
pub fn date_at(array: &Date32Array, row: usize) -> Option<NaiveDate> {
    if array.is_null(row) {
        return None;
    }
    days_to_date(array.value(row))
}

// ---------------------------------------------------------------------------
// JSON rows
// ---------------------------------------------------------------------------

/// Convert a batch to one JSON object per row, keyed by column name
///
/// # Errors
/// Returns error if a column fails to downcast to its declared type
pub fn batch_to_json(batch: &RecordBatch) -> Result<Vec<serde_json::Value>> {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());

    for row_idx in 0..batch.num_rows() {
        let mut row = serde_json::Map::new();
        for (col_idx, field) in schema.fields().iter().enumerate() {
            let value = cell_to_json(batch.column(col_idx), row_idx)?;
            row.insert(field.name().clone(), value);
        }
        rows.push(serde_json::Value::Object(row));
    }

    Ok(rows)
}

fn cell_to_json(array: &ArrayRef, idx: usize) -> Result<serde_json::Value> {
    if array.is_null(idx) {
        return Ok(serde_json::Value::Null);
    }

    let downcast_failed = || Error::Other(format!("Failed to downcast {:?}", array.data_type()));
    match array.data_type() {
        DataType::Int32 | DataType::Int64 => int_at(array, idx)
            .map(serde_json::Value::from)
            .ok_or_else(downcast_failed),
        DataType::Float64 => Ok(serde_json::json!(f64_at(array, idx))),
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(downcast_failed)?;
            Ok(serde_json::Value::String(arr.value(idx).to_string()))
        }
        DataType::Date32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Date32Array>()
                .ok_or_else(downcast_failed)?;
            Ok(date_at(arr, idx).map_or(serde_json::Value::Null, |d| {
                serde_json::Value::String(d.to_string())
            }))
        }
        dt => Ok(serde_json::Value::String(format!("<unsupported type: {dt:?}>"))),
    }
}

fn int_at(array: &ArrayRef, idx: usize) -> Option<i64> {
    match array.data_type() {
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| i64::from(a.value(idx))),
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(idx)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_precision_loss)]
    fn create_test_batch(num_rows: usize) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("value", DataType::Float64, false),
            Field::new("name", DataType::Utf8, false),
        ]);

        let id_array = Int32Array::from_iter_values(0..num_rows as i32);
        let value_array = Float64Array::from_iter_values((0..num_rows).map(|i| i as f64 * 0.5));
        let name_array = StringArray::from_iter_values((0..num_rows).map(|i| format!("name_{i}")));

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(id_array),
                Arc::new(value_array),
                Arc::new(name_array),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_table_combines_batches() {
        let first = create_test_batch(100);
        let table = Table::new(first.schema(), vec![first, create_test_batch(200)]).unwrap();

        assert_eq!(table.batches().len(), 2);
        assert_eq!(table.num_rows(), 300);
        assert_eq!(table.combined().unwrap().num_rows(), 300);
    }

    #[test]
    fn test_schema_validation() {
        let batch = create_test_batch(10);
        let other = Schema::new(vec![Field::new("different_field", DataType::Int32, false)]);
        let other_batch = RecordBatch::try_new(
            Arc::new(other),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let result = Table::new(batch.schema(), vec![batch, other_batch]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Schema mismatch"));
    }

    #[test]
    fn test_empty_table() {
        let schema = create_test_batch(0).schema();
        let table = Table::new(schema, vec![]).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_csv_round_trip() {
        let table = Table::from_batch(create_test_batch(25));
        let bytes = table.to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("id,value,name\n"));

        let restored = Table::from_csv_bytes(table.schema(), &bytes).unwrap();
        let original = table.combined().unwrap();
        let restored = restored.combined().unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_batch_to_json() {
        let rows = batch_to_json(&create_test_batch(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1],
            serde_json::json!({"id": 1, "value": 0.5, "name": "name_1"})
        );

        let schema = Arc::new(Schema::new(vec![Field::new("day", DataType::Date32, true)]));
        let days = Date32Array::from(vec![Some(0), None]);
        let batch = RecordBatch::try_new(schema, vec![Arc::new(days)]).unwrap();
        let rows = batch_to_json(&batch).unwrap();
        assert_eq!(rows[0]["day"], "1970-01-01");
        assert!(rows[1]["day"].is_null());
    }

    #[test]
    fn test_typed_access() {
        let batch = create_test_batch(3);
        assert_eq!(int32(&batch, "id").unwrap().value(2), 2);
        assert_eq!(utf8(&batch, "name").unwrap().value(1), "name_1");
        assert!(float64(&batch, "name").is_err());
        assert!(column(&batch, "missing").is_err());
        assert_eq!(f64_at(column(&batch, "id").unwrap(), 2), Some(2.0));
        assert_eq!(f64_at(column(&batch, "name").unwrap(), 0), None);
    }

    #[test]
    fn test_date_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        let days = date_to_days(date);
        assert_eq!(days_to_date(days), Some(date));
        assert_eq!(date_to_days(unix_epoch()), 0);
    }

    #[test]
    fn test_table_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Table>();
    }
}
