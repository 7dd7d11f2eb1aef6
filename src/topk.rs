//! Top-K selection over `Float64` columns
//!
//! Used by the read side to pull the most significant rows out of the
//! results table without sorting it. A bounded max-heap keeps the `k` best
//! keys seen so far: O(N log K) time, O(K) space.
//!
//! Null and NaN values never rank. Ties keep the earlier row.

use crate::Error;
use arrow::array::{Array, Float64Array, UInt64Array};
use arrow::compute::take;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Sort order for Top-K selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest K values first (p-values)
    Ascending,
    /// Largest K values first (test statistics)
    Descending,
}

impl SortOrder {
    fn key(self, value: f64) -> f64 {
        match self {
            Self::Ascending => value,
            Self::Descending => -value,
        }
    }
}

/// Top-K selection on record batches
pub trait TopKSelection {
    /// Rows holding the `k` best values of a `Float64` column, best first
    ///
    /// Fewer than `k` rows come back when the column has fewer ranked
    /// (non-null, non-NaN) values.
    ///
    /// # Errors
    /// Returns error if `k` is zero, the column index is out of bounds, or the
    /// column is not `Float64`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use phewas_engine::topk::{SortOrder, TopKSelection};
    /// use arrow::array::{Float64Array, RecordBatch};
    /// use arrow::datatypes::{DataType, Field, Schema};
    /// use std::sync::Arc;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schema = Arc::new(Schema::new(vec![Field::new("p", DataType::Float64, true)]));
    /// let batch = RecordBatch::try_new(
    ///     schema,
    ///     vec![Arc::new(Float64Array::from(vec![Some(0.2), None, Some(1e-8), Some(0.04)]))],
    /// )?;
    ///
    /// let best = batch.top_k(0, 2, SortOrder::Ascending)?;
    /// assert_eq!(best.num_rows(), 2);
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
                "Column index {column_index} out of bounds (batch has {} columns)",
                self.num_columns()
            )));
        }

        let column = self.column(column_index);
        if column.data_type() != &DataType::Float64 {
            return Err(Error::InvalidInput(format!(
                "Top-K needs a Float64 column, got {:?}",
                column.data_type()
            )));
        }
        let values = column
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::Other("Failed to downcast Float64 column".to_string()))?;

        let indices = select_top_k_indices(values, k, order);
        take_rows(self, &indices)
    }
}

/// Heap entry ordered by key, then by row
#[derive(Debug, Clone, Copy)]
struct Ranked {
    key: f64,
    index: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Row indices of the `k` smallest keys, best first
fn select_top_k_indices(values: &Float64Array, k: usize, order: SortOrder) -> Vec<u64> {
    // max-heap: the worst retained entry sits on top
    let mut heap: BinaryHeap<Ranked> = BinaryHeap::with_capacity(k.min(values.len()));

    for index in 0..values.len() {
        if values.is_null(index) {
            continue;
        }
        let value = values.value(index);
        if value.is_nan() {
            continue;
        }
        let item = Ranked {
            key: order.key(value),
            index,
        };
        if heap.len() < k {
            heap.push(item);
        } else if heap.peek().is_some_and(|worst| item < *worst) {
            heap.pop();
            heap.push(item);
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|item| item.index as u64)
        .collect()
}

fn take_rows(batch: &RecordBatch, indices: &[u64]) -> crate::Result<RecordBatch> {
    let indices = UInt64Array::from(indices.to_vec());
    let columns = batch
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), &indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}
