//! Storage backend (Arrow/Parquet)
//!
//! **Append-only design**:
//! - Every table is a fixed schema plus a list of Arrow `RecordBatch`es
//! - Write pattern: bulk batch appends, never row updates
//! - Persistence: one Parquet file per table inside the run directory
//!
//! The [`StorageEngine`] is an explicit per-run handle threaded through the
//! experiment, so several experiments can coexist in one process.

mod like;

pub use like::like_match;

use crate::{Error, Result};
use arrow::array::{Array, RecordBatch};
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only columnar table
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Create an empty table with a fixed schema
    #[must_use]
    pub const fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    /// Load a table from a Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!(
                "Failed to open Parquet file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;
        let schema = builder.schema().clone();

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            if batch.num_rows() > 0 {
                batches.push(batch);
            }
        }

        Ok(Self { schema, batches })
    }

    /// Write the whole table to a Parquet file, replacing it
    ///
    /// # Errors
    /// Returns error if the file cannot be created or encoded
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        debug!(
            path = %path.as_ref().display(),
            rows = self.num_rows(),
            "table persisted"
        );
        Ok(())
    }

    /// Table schema
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total number of rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// True when no rows were appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Append a batch (the only write operation)
    ///
    /// # Errors
    ///
    /// Returns error if batch schema doesn't match the table schema
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.schema() != self.schema {
            return Err(Error::StorageError(format!(
                "Schema mismatch: expected {:?}, got {:?}",
                self.schema,
                batch.schema()
            )));
        }
        if batch.num_rows() > 0 {
            self.batches.push(batch);
        }
        Ok(())
    }

    /// Materialise all batches into one
    ///
    /// # Errors
    /// Returns error if Arrow fails to concatenate
    pub fn concat(&self) -> Result<RecordBatch> {
        Ok(arrow::compute::concat_batches(&self.schema, &self.batches)?)
    }
}

/// Downcast a named column of a batch
///
/// # Errors
/// Returns error if the column is absent or has a different array type
pub fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::StorageError(format!("Missing column '{name}'")))?
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| Error::StorageError(format!("Column '{name}' has unexpected type")))
}

/// Per-run storage handle bound to a run directory
#[derive(Debug, Clone)]
pub struct StorageEngine {
    root: PathBuf,
}

impl StorageEngine {
    /// Create a fresh run directory
    ///
    /// # Errors
    /// Returns [`Error::RunDirectoryExists`] if the directory is already there
    pub fn create<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if root.exists() {
            return Err(Error::RunDirectoryExists(root));
        }
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open an existing run directory (read side)
    ///
    /// # Errors
    /// Returns error if the directory does not exist
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::StorageError(format!(
                "Run directory '{}' not found",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Run directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine handle recorded in run metadata
    #[must_use]
    pub fn url(&self) -> String {
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        format!("parquet://{}", root.display())
    }

    /// Path of a named table
    #[must_use]
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.parquet"))
    }

    /// True if the table was persisted
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.table_path(table).is_file()
    }

    /// Persist a table, replacing the previous file
    ///
    /// # Errors
    /// Returns error if writing fails
    pub fn write_table(&self, table: &str, data: &Table) -> Result<()> {
        data.write_parquet(self.table_path(table))
    }

    /// Load a persisted table
    ///
    /// # Errors
    /// Returns error if the table is missing or unreadable
    pub fn read_table(&self, table: &str) -> Result<Table> {
        Table::load_parquet(self.table_path(table))
    }

    /// Write a pretty-printed JSON artifact
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.root.join(file_name);
        write_json(&path, value)?;
        Ok(path)
    }

    /// Read a JSON artifact
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed
    pub fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> Result<T> {
        read_json(self.root.join(file_name))
    }
}

/// Write any serialisable value as pretty JSON
///
/// # Errors
/// Returns error if the file cannot be created or encoded
pub fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Read a JSON file
///
/// # Errors
/// Returns error if the file is missing or malformed
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("value", DataType::Float64, true),
            Field::new("name", DataType::Utf8, false),
        ]))
    }

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    #[allow(clippy::cast_precision_loss)]
    fn create_test_batch(num_rows: usize) -> RecordBatch {
        let id_array = Int32Array::from_iter_values(0..num_rows as i32);
        let value_array = Float64Array::from_iter_values((0..num_rows).map(|i| i as f64));
        let name_array = StringArray::from_iter_values((0..num_rows).map(|i| format!("name_{i}")));

        RecordBatch::try_new(
            test_schema(),
            vec![
                Arc::new(id_array),
                Arc::new(value_array),
                Arc::new(name_array),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_append_batch_accumulates_rows() {
        let mut table = Table::new(test_schema());
        table.append_batch(create_test_batch(100)).unwrap();
        table.append_batch(create_test_batch(200)).unwrap();

        assert_eq!(table.batches().len(), 2);
        assert_eq!(table.num_rows(), 300);
        assert_eq!(table.concat().unwrap().num_rows(), 300);
    }

    #[test]
    fn test_append_batch_schema_validation() {
        let mut table = Table::new(test_schema());
        let incompatible_schema = Schema::new(vec![Field::new(
            "different_field",
            DataType::Int32,
            false,
        )]);
        let incompatible_batch = RecordBatch::try_new(
            Arc::new(incompatible_schema),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let result = table.append_batch(incompatible_batch);
        assert!(result.unwrap_err().to_string().contains("Schema mismatch"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_empty_batches_are_not_stored() {
        let mut table = Table::new(test_schema());
        table.append_batch(create_test_batch(0)).unwrap();
        assert!(table.batches().is_empty());
        assert_eq!(table.concat().unwrap().num_rows(), 0);
    }

    #[test]
    fn test_parquet_persistence_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::create(dir.path().join("run")).unwrap();

        let mut table = Table::new(test_schema());
        table.append_batch(create_test_batch(10)).unwrap();
        table.append_batch(create_test_batch(5)).unwrap();
        engine.write_table("things", &table).unwrap();

        assert!(engine.has_table("things"));
        let loaded = engine.read_table("things").unwrap();
        assert_eq!(loaded.num_rows(), 15);
        let batch = loaded.concat().unwrap();
        let names = column::<StringArray>(&batch, "name").unwrap();
        assert_eq!(names.value(12), "name_2");
    }

    #[test]
    fn test_create_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageEngine::create(dir.path()).unwrap_err();
        assert!(matches!(err, Error::RunDirectoryExists(_)));
        assert!(err.to_string().contains("Remove it or rename"));
    }

    #[test]
    fn test_open_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StorageEngine::open(dir.path().join("absent")).is_err());
        let engine = StorageEngine::open(dir.path()).unwrap();
        assert!(engine.url().starts_with("parquet://"));
    }

    #[test]
    fn test_column_downcast_errors() {
        let batch = create_test_batch(3);
        assert!(column::<StringArray>(&batch, "missing").is_err());
        assert!(column::<StringArray>(&batch, "id").is_err());
        assert_eq!(column::<Int32Array>(&batch, "id").unwrap().value(2), 2);
    }

    #[test]
    fn test_json_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        engine.write_json("meta.json", &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = engine.read_json("meta.json").unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
