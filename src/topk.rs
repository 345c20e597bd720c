//! Top-K selection algorithms
//!
//! **Problem**: "top 10 countries", "top 15 tags" only need the first K rows
//! of a descending sort. A full sort is O(N log N); heap selection is
//! O(N log K).
//!
//! Selection is stable: rows with equal values keep their input order, and
//! null values always rank after every non-null value. Since grouped output
//! arrives in ascending key order, ties in a top-N table resolve by key.

use crate::storage;
use crate::Error;
use arrow::array::{Array, RecordBatch, StringArray, UInt32Array};
use arrow::compute;
use arrow::datatypes::DataType;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

/// Sort order for Top-K selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (smallest K values)
    Ascending,
    /// Descending order (largest K values)
    Descending,
}

/// Trait for Top-K selection on record batches
pub trait TopKSelection {
    /// Select top K rows by a specific column
    ///
    /// # Arguments
    /// * `column_index` - Index of the column to sort by
    /// * `k` - Number of rows to select
    /// * `order` - Sort order (Ascending or Descending)
    ///
    /// # Returns
    /// A new `RecordBatch` containing the top K rows in rank order
    ///
    /// # Errors
    /// Returns error if:
    /// - Column index is out of bounds
    /// - Column data type is not numeric
    /// - K is zero
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tally::topk::{TopKSelection, SortOrder};
    /// use arrow::array::{Float64Array, RecordBatch};
    /// use arrow::datatypes::{DataType, Field, Schema};
    /// use std::sync::Arc;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schema = Arc::new(Schema::new(vec![
    ///     Field::new("count", DataType::Float64, false),
    /// ]));
    /// let batch = RecordBatch::try_new(
    ///     schema,
    ///     vec![Arc::new(Float64Array::from(vec![1.0, 5.0, 3.0, 9.0, 2.0]))],
    /// )?;
    ///
    /// let top3 = batch.top_k(0, 3, SortOrder::Descending)?;
    /// assert_eq!(top3.num_rows(), 3);
    /// # Ok(())
    /// # }
    /// ```
    fn top_k(&self, column_index: usize, k: usize, order: SortOrder) -> crate::Result<RecordBatch>;
}

impl TopKSelection for RecordBatch {
    fn top_k(&self, column_index: usize, k: usize, order: SortOrder) -> crate::Result<RecordBatch> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be greater than 0".to_string()));
        }

        if column_index >= self.num_columns() {
            return Err(Error::InvalidInput(format!(
                "Column index {} out of bounds (batch has {} columns)",
                column_index,
                self.num_columns()
            )));
        }

        let column = self.column(column_index);
        match column.data_type() {
            DataType::Int32 | DataType::Int64 | DataType::Float64 => {}
            dt => {
                return Err(Error::InvalidInput(format!(
                    "Top-K not supported for data type: {dt:?}"
                )))
            }
        }

        let values: Vec<Option<f64>> = (0..column.len())
            .map(|row| storage::f64_at(column, row))
            .collect();
        let indices = select_top_k_indices(&values, k, order);

        build_batch_from_indices(self, &indices)
    }
}

/// Heap entry; `Ord` puts the worst-ranked item on top of the max-heap
#[derive(Debug, Clone, Copy)]
struct RankedItem {
    value: f64,
    index: usize,
    order: SortOrder,
}

impl RankedItem {
    /// `Less` when `self` comes first in the output
    fn rank(&self, other: &Self) -> Ordering {
        let by_value = match self.order {
            SortOrder::Descending => other.value.partial_cmp(&self.value),
            SortOrder::Ascending => self.value.partial_cmp(&other.value),
        }
        .unwrap_or(Ordering::Equal);
        by_value.then(self.index.cmp(&other.index))
    }
}

impl PartialEq for RankedItem {
    fn eq(&self, other: &Self) -> bool {
        self.rank(other) == Ordering::Equal
    }
}

impl Eq for RankedItem {}

impl Ord for RankedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank(other)
    }
}

impl PartialOrd for RankedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select top K indices using a bounded heap
///
/// Time complexity: O(N log K), space O(K). Nulls fill any remaining slots
/// in input order.
fn select_top_k_indices(values: &[Option<f64>], k: usize, order: SortOrder) -> Vec<usize> {
    let mut heap: BinaryHeap<RankedItem> = BinaryHeap::with_capacity(k);

    for (index, value) in values.iter().enumerate() {
        let Some(value) = *value else { continue };
        let item = RankedItem {
            value,
            index,
            order,
        };

        if heap.len() < k {
            heap.push(item);
        } else if let Some(worst) = heap.peek() {
            if item.rank(worst) == Ordering::Less {
                heap.pop();
                heap.push(item);
            }
        }
    }

    let mut selected = heap.into_vec();
    selected.sort_by(RankedItem::rank);

    let mut indices: Vec<usize> = selected.into_iter().map(|item| item.index).collect();
    let nulls = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_none())
        .map(|(i, _)| i);
    let room = k.saturating_sub(indices.len());
    indices.extend(nulls.take(room));
    indices
}

/// Build a new record batch from selected row indices
fn build_batch_from_indices(batch: &RecordBatch, indices: &[usize]) -> crate::Result<RecordBatch> {
    let indices = indices
        .iter()
        .map(|&i| u32::try_from(i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidInput("Row index exceeds u32 range".to_string()))?;

    compute::take_record_batch(batch, &UInt32Array::from(indices))
        .map_err(|e| Error::StorageError(format!("Failed to create result batch: {e}")))
}

/// First `n` distinct non-null values of a text column, in row order.
///
/// Used after a descending sort to pick "the top N countries" while keeping
/// every row that belongs to them.
#[must_use]
pub fn distinct_head(array: &StringArray, n: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut head = Vec::new();
    for row in 0..array.len() {
        if head.len() == n {
            break;
        }
        if let Some(value) = storage::str_at(array, row) {
            if seen.insert(value) {
                head.push(value.to_string());
            }
        }
    }
    head
}

#[cfg(test)]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array, Int64Array};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn create_test_batch(values: Vec<f64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("score", DataType::Float64, false),
        ]));

        let ids: Vec<i32> = (0..values.len() as i32).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(Float64Array::from(values)),
            ],
        )
        .unwrap()
    }

    fn ids(batch: &RecordBatch) -> Vec<i32> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_top_k_descending_basic() {
        let batch = create_test_batch(vec![1.0, 5.0, 3.0, 9.0, 2.0]);
        let result = batch.top_k(1, 3, SortOrder::Descending).unwrap();
        assert_eq!(ids(&result), vec![3, 1, 2]);
    }

    #[test]
    fn test_top_k_ascending_basic() {
        let batch = create_test_batch(vec![1.0, 5.0, 3.0, 9.0, 2.0]);
        let result = batch.top_k(1, 3, SortOrder::Ascending).unwrap();
        assert_eq!(ids(&result), vec![0, 4, 2]);
    }

    #[test]
    fn test_top_k_ties_keep_input_order() {
        let batch = create_test_batch(vec![4.0, 7.0, 4.0, 7.0, 4.0, 1.0]);
        let result = batch.top_k(1, 4, SortOrder::Descending).unwrap();
        assert_eq!(ids(&result), vec![1, 3, 0, 2]);

        let result = batch.top_k(1, 3, SortOrder::Ascending).unwrap();
        assert_eq!(ids(&result), vec![5, 0, 2]);
    }

    #[test]
    fn test_top_k_k_greater_than_length() {
        let batch = create_test_batch(vec![2.0, 1.0]);
        let result = batch.top_k(1, 10, SortOrder::Descending).unwrap();
        assert_eq!(ids(&result), vec![0, 1]);
    }

    #[test]
    fn test_top_k_k_zero_fails() {
        let batch = create_test_batch(vec![1.0, 2.0]);
        let result = batch.top_k(1, 0, SortOrder::Descending);
        assert!(result.unwrap_err().to_string().contains("k must be greater than 0"));
    }

    #[test]
    fn test_top_k_invalid_column_index() {
        let batch = create_test_batch(vec![1.0, 2.0]);
        assert!(batch.top_k(5, 1, SortOrder::Descending).is_err());
    }

    #[test]
    fn test_top_k_unsupported_type() {
        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["a", "b"]))])
                .unwrap();
        let err = batch.top_k(0, 1, SortOrder::Descending).unwrap_err();
        assert!(err.to_string().contains("Top-K not supported"));
    }

    #[test]
    fn test_top_k_int64_with_nulls_last() {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![Some(3), None, Some(8), Some(1)]))],
        )
        .unwrap();
        let result = batch.top_k(0, 4, SortOrder::Descending).unwrap();
        let column = result.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(column.value(0), 8);
        assert_eq!(column.value(2), 1);
        assert!(column.is_null(3));
    }

    #[test]
    fn test_top_k_preserves_row_integrity() {
        let batch = create_test_batch(vec![0.5, 2.5, 1.5]);
        let result = batch.top_k(1, 3, SortOrder::Descending).unwrap();
        let scores = result
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        for (id, score) in ids(&result).into_iter().zip(scores.values().iter()) {
            assert_eq!(f64::from(id) + 0.5, *score);
        }
    }

    #[test]
    fn test_distinct_head() {
        let array = StringArray::from(vec![
            Some("USA"),
            Some("USA"),
            None,
            Some("ITA"),
            Some("GBR"),
            Some("ITA"),
        ]);
        assert_eq!(distinct_head(&array, 2), vec!["USA", "ITA"]);
        assert_eq!(distinct_head(&array, 10), vec!["USA", "ITA", "GBR"]);
        assert!(distinct_head(&array, 0).is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: Top-K returns min(k, n) rows
            #[test]
            fn prop_top_k_returns_k_rows(
                values in prop::collection::vec(0.0f64..1000.0, 1..200),
                k in 1usize..50
            ) {
                let n = values.len();
                let batch = create_test_batch(values);
                let result = batch.top_k(1, k, SortOrder::Descending).unwrap();
                prop_assert_eq!(result.num_rows(), k.min(n));
            }

            /// Property: descending output is sorted, ties by ascending id
            #[test]
            fn prop_top_k_descending_is_stable(
                values in prop::collection::vec(0u8..5, 1..100),
                k in 1usize..100
            ) {
                let batch = create_test_batch(values.iter().map(|&v| f64::from(v)).collect());
                let result = batch.top_k(1, k, SortOrder::Descending).unwrap();
                let ids = ids(&result);
                for pair in ids.windows(2) {
                    let (a, b) = (values[pair[0] as usize], values[pair[1] as usize]);
                    prop_assert!(a > b || (a == b && pair[0] < pair[1]));
                }
            }

            /// Property: heap selection agrees with a full stable sort
            #[test]
            fn prop_matches_stable_sort(
                values in prop::collection::vec(0u8..10, 1..100),
                k in 1usize..100
            ) {
                let batch = create_test_batch(values.iter().map(|&v| f64::from(v)).collect());
                let result = batch.top_k(1, k, SortOrder::Ascending).unwrap();

                let mut expected: Vec<i32> = (0..values.len() as i32).collect();
                expected.sort_by_key(|&i| values[i as usize]);
                expected.truncate(k);
                prop_assert_eq!(ids(&result), expected);
            }
        }
    }
}
