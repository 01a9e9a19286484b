//! Participant storage (Arrow)
//!
//! **Append-Only Design**:
//! - One `RecordBatch` per study, appended once by the population generator
//! - Every batch shares one schema; mismatches are rejected at append time
//! - No row updates: later stages read slices and build new batches
//!
//! Also hosts the typed column accessors every stage uses to read named
//! columns out of a batch.

use crate::{Error, Result};
use arrow::array::{Array, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

/// Per-study store of participant batches
#[derive(Debug, Clone)]
pub struct StudyStore {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    positions: FxHashMap<i64, usize>,
}

impl StudyStore {
    /// Create an empty store for batches of `schema`
    #[must_use]
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            positions: FxHashMap::default(),
        }
    }

    /// Append the participant batch of one study
    ///
    /// # Errors
    ///
    /// Returns error if the batch schema doesn't match the store's schema or
    /// the study already has a batch
    pub fn append_batch(&mut self, study_id: i64, batch: RecordBatch) -> Result<()> {
        if batch.schema() != self.schema {
            return Err(Error::StorageError(format!(
                "Schema mismatch: expected {:?}, got {:?}",
                self.schema,
                batch.schema()
            )));
        }
        if self.positions.contains_key(&study_id) {
            return Err(Error::StorageError(format!(
                "Study {study_id} already has participant records"
            )));
        }

        self.positions.insert(study_id, self.batches.len());
        self.batches.push(batch);
        Ok(())
    }

    /// Participant batch of one study
    #[must_use]
    pub fn study(&self, study_id: i64) -> Option<&RecordBatch> {
        self.positions.get(&study_id).map(|&i| &self.batches[i])
    }

    /// Number of studies stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Whether no study has been stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total participant rows
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Concatenate every study into one batch
    ///
    /// # Errors
    ///
    /// Returns error if Arrow fails to concatenate
    pub fn concat(&self) -> Result<RecordBatch> {
        arrow::compute::concat_batches(&self.schema, &self.batches)
            .map_err(|e| Error::StorageError(format!("Failed to concatenate batches: {e}")))
    }
}

fn column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    type_name: &str,
) -> Result<&'a A> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::InvalidInput(format!("Column '{name}' not found")))?;
    column.as_any().downcast_ref::<A>().ok_or_else(|| {
        Error::InvalidInput(format!(
            "Column '{name}' is {:?}, expected {type_name}",
            column.data_type()
        ))
    })
}

/// Named `Float64` column
///
/// # Errors
///
/// Returns error if the column is missing or has another type
pub fn float64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    column(batch, name, "Float64")
}

/// Named `Int64` column
///
/// # Errors
///
/// Returns error if the column is missing or has another type
pub fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    column(batch, name, "Int64")
}

/// Named `Int32` column
///
/// # Errors
///
/// Returns error if the column is missing or has another type
pub fn int32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    column(batch, name, "Int32")
}

/// Named `Utf8` column
///
/// # Errors
///
/// Returns error if the column is missing or has another type
pub fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    column(batch, name, "Utf8")
}

/// Named `Boolean` column
///
/// # Errors
///
/// Returns error if the column is missing or has another type
pub fn boolean_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a BooleanArray> {
    column(batch, name, "Boolean")
}
