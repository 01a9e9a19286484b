//! Top-K row selection
//!
//! Keeps the K rows with the largest value in one `Float64` column using a
//! bounded min-heap: O(N log K) instead of a full sort.
//!
//! The sampling stage truncates a study by attaching a uniform random weight
//! column and keeping the top K weights. Selection never looks at outcomes.

use crate::{Error, Result};
use arrow::array::{Array, Float64Array, UInt32Array};
use arrow::compute::{sort_to_indices, take_record_batch, SortOptions};
use arrow::record_batch::RecordBatch;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Trait for Top-K selection on record batches
pub trait TopKSelection {
    /// Keep the `k` rows with the largest values in a `Float64` column
    ///
    /// Rows come back in descending order of the selection column. Null
    /// values are never selected. If `k` is at least the row count every row
    /// is returned, sorted.
    ///
    /// # Errors
    /// Returns error if:
    /// - Column index is out of bounds
    /// - Column data type is not `Float64`
    /// - K is zero
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nma_sim::topk::TopKSelection;
    /// use arrow::array::{Float64Array, RecordBatch};
    /// use arrow::datatypes::{DataType, Field, Schema};
    /// use std::sync::Arc;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schema = Arc::new(Schema::new(vec![
    ///     Field::new("weight", DataType::Float64, false),
    /// ]));
    /// let batch = RecordBatch::try_new(
    ///     schema,
    ///     vec![Arc::new(Float64Array::from(vec![0.1, 0.5, 0.3, 0.9, 0.2]))],
    /// )?;
    ///
    /// let top3 = batch.top_k(0, 3)?;
    /// assert_eq!(top3.num_rows(), 3);
    /// # Ok(())
    /// # }
    /// ```
    fn top_k(&self, column_index: usize, k: usize) -> Result<RecordBatch>;
}

impl TopKSelection for RecordBatch {
    fn top_k(&self, column_index: usize, k: usize) -> Result<RecordBatch> {
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
        let values = column.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
            Error::InvalidInput(format!(
                "Top-K needs a Float64 column, got {:?}",
                column.data_type()
            ))
        })?;

        if k >= self.num_rows() {
            return sort_all_rows(self, values);
        }
        take_rows(self, &select_top_k(values, k))
    }
}

// Heap entry ordered by value; wrapped in `Reverse` so the smallest kept value is on top
#[derive(Debug, Clone, Copy)]
struct HeapItem {
    value: f64,
    index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Row indices of the `k` largest non-null values, largest first
///
/// Time complexity: O(N log K); space: O(K)
fn select_top_k(values: &Float64Array, k: usize) -> Vec<usize> {
    let mut heap: BinaryHeap<Reverse<HeapItem>> = BinaryHeap::with_capacity(k);

    for index in (0..values.len()).filter(|&i| !values.is_null(i)) {
        let item = HeapItem {
            value: values.value(index),
            index,
        };
        if heap.len() < k {
            heap.push(Reverse(item));
        } else if heap.peek().is_some_and(|Reverse(top)| item > *top) {
            heap.pop();
            heap.push(Reverse(item));
        }
    }

    // Ascending order of Reverse is descending order of value
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(item)| item.index)
        .collect()
}

/// Gather rows by index into a new batch
fn take_rows(batch: &RecordBatch, indices: &[usize]) -> Result<RecordBatch> {
    let indices = indices
        .iter()
        .map(|&i| u32::try_from(i))
        .collect::<std::result::Result<Vec<u32>, _>>()
        .map_err(|e| Error::InvalidInput(format!("Row index exceeds u32: {e}")))?;
    take_record_batch(batch, &UInt32Array::from(indices))
        .map_err(|e| Error::StorageError(format!("Failed to create result batch: {e}")))
}

/// Fallback: sort all rows when k >= `num_rows`
fn sort_all_rows(batch: &RecordBatch, values: &Float64Array) -> Result<RecordBatch> {
    let options = SortOptions {
        descending: true,
        nulls_first: false,
    };
    let indices = sort_to_indices(values, Some(options), None)
        .map_err(|e| Error::StorageError(format!("Failed to sort: {e}")))?;
    take_record_batch(batch, &indices)
        .map_err(|e| Error::StorageError(format!("Failed to create result batch: {e}")))
}
