//! Storage layer (Arrow record batches backed by CSV or Parquet)
//!
//! Every table the campaign touches (pool, selected points, lab results and
//! ledger versions) goes through this module. Tables are read
//! whole into a single [`RecordBatch`]: pools are a few thousand rows at most,
//! and every caller needs random access by positional index.
//!
//! CSV is the lab-facing exchange format. Parquet is accepted for pools.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::{Error, Result};

/// Rows per batch when streaming CSV files
const CSV_BATCH_ROWS: usize = 8192;

/// How CSV column types are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTypes {
    /// Infer types from the file contents
    Infer,
    /// Read every column as nullable text
    Text,
}

/// Load a table, dispatching on the file extension (`.csv` or `.parquet`)
///
/// # Errors
/// Returns error if the file cannot be read or the extension is unsupported
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("csv") => read_csv(path, ColumnTypes::Infer),
        Some("parquet") => read_parquet(path),
        other => Err(Error::StorageError(format!(
            "Unsupported table format {other:?} for {} (expected .csv or .parquet)",
            path.display()
        ))),
    }
}

/// Load a CSV file with a header row
///
/// # Errors
/// Returns error if the file cannot be opened or parsed
pub fn read_csv<P: AsRef<Path>>(path: P, types: ColumnTypes) -> Result<RecordBatch> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| {
        Error::StorageError(format!("Failed to open CSV file {}: {e}", path.display()))
    })?;

    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;

    let schema: SchemaRef = match types {
        ColumnTypes::Infer => Arc::new(inferred),
        ColumnTypes::Text => Arc::new(Schema::new(
            inferred
                .fields()
                .iter()
                .map(|f| Field::new(f.name(), DataType::Utf8, true))
                .collect::<Vec<_>>(),
        )),
    };

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_batch_size(CSV_BATCH_ROWS)
        .build(file)?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }

    Ok(compute::concat_batches(&schema, &batches)?)
}

/// Load a table from a Parquet file
///
/// # Errors
/// Returns error if file cannot be read or parsed
pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path.as_ref()).map_err(|e| {
        Error::StorageError(format!("Failed to open Parquet file: {e}"))
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
        batches.push(batch);
    }

    Ok(compute::concat_batches(&schema, &batches)?)
}

/// Write a batch as CSV with a header row, replacing any existing file
///
/// # Errors
/// Returns error if the file cannot be created or written
pub fn write_csv<P: AsRef<Path>>(path: P, batch: &RecordBatch) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| {
        Error::StorageError(format!("Failed to create CSV file {}: {e}", path.display()))
    })?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(batch)?;
    Ok(())
}

/// Position of a named column
///
/// # Errors
/// Returns `InvalidInput` if the column is absent
pub fn column_index(batch: &RecordBatch, name: &str) -> Result<usize> {
    batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::InvalidInput(format!("Column not found: {name}")))
}

/// Read a column as `f64`, casting integer or text columns
///
/// # Errors
/// Returns `InvalidInput` if the column is absent or holds empty/non-numeric cells
pub fn float_column(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let column = batch.column(column_index(batch, name)?);
    let cast = compute::cast(column, &DataType::Float64)?;
    if cast.null_count() > 0 {
        return Err(Error::InvalidInput(format!(
            "Column '{name}' has {} empty or non-numeric cells",
            cast.null_count()
        )));
    }
    let values = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Other(format!("Failed to downcast '{name}' to Float64Array")))?;
    Ok(values.values().to_vec())
}

/// Read a column of integer codes; `2.0` is accepted as `2`
///
/// # Errors
/// Returns `InvalidInput` if a value is missing or fractional
pub fn integer_column(batch: &RecordBatch, name: &str) -> Result<Vec<i64>> {
    float_column(batch, name)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            if value.fract() == 0.0 && value.is_finite() {
                #[allow(clippy::cast_possible_truncation)]
                let code = value as i64;
                Ok(code)
            } else {
                Err(Error::InvalidInput(format!(
                    "Column '{name}' row {row}: {value} is not an integer code"
                )))
            }
        })
        .collect()
}

/// Read a column as optional text, rendering non-text types
///
/// # Errors
/// Returns `InvalidInput` if the column is absent
pub fn text_column(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let column = batch.column(column_index(batch, name)?);
    text_values(column)
}

pub(crate) fn text_values(column: &ArrayRef) -> Result<Vec<Option<String>>> {
    let cast = compute::cast(column, &DataType::Utf8)?;
    let values = cast
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Other("Failed to downcast column to StringArray".to_string()))?;
    Ok(values.iter().map(|v| v.map(str::to_string)).collect())
}

/// Build a batch from named `f64` columns
///
/// # Errors
/// Returns error if the columns have different lengths
pub fn float_batch(columns: &[(String, Vec<f64>)]) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, _)| Field::new(name, DataType::Float64, false))
        .collect();
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|(_, values)| Arc::new(Float64Array::from(values.clone())) as ArrayRef)
        .collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Build an all-text batch from named columns of optional cells
///
/// # Errors
/// Returns error if the columns have different lengths
pub fn text_batch(columns: &[String], cells: Vec<Vec<Option<String>>>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    let arrays: Vec<ArrayRef> = cells
        .into_iter()
        .map(|column| Arc::new(StringArray::from(column)) as ArrayRef)
        .collect();
    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Append a column to a batch
///
/// # Errors
/// Returns error if the column length differs from the batch row count
pub fn with_column(batch: &RecordBatch, name: &str, column: ArrayRef) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(name, column.data_type().clone(), column.null_count() > 0));
    let mut columns = batch.columns().to_vec();
    columns.push(column);
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}
