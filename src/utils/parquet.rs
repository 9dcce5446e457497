//! Low-level Parquet reading for bucket archives.
//!
//! One bucket file at a time: open, optionally project a subset of
//! columns, scan with a configurable batch size, and apply a row-level
//! filter. The reader and merge routines drive this from rayon.

use std::fs::File;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use parquet::arrow::{ProjectionMask, arrow_reader::ParquetRecordBatchReaderBuilder};

use crate::error::{BucketError, Result};
use crate::filter::BatchFilter;
use crate::utils::logging::log_warning;

/// Default batch size for Parquet scanning
pub const DEFAULT_BATCH_SIZE: usize = 131_072;

/// Creates a standardized error for Parquet operations
pub fn create_parquet_error<E: std::fmt::Display>(message: &str, error: E) -> BucketError {
    BucketError::Parquet(parquet::errors::ParquetError::General(format!(
        "{message}: {error}"
    )))
}

/// Build a projection mask for a set of column names.
///
/// Columns missing from the file are skipped with a warning; if none of
/// the requested columns exist, all columns are read.
fn projection_for_columns(
    columns: &[String],
    builder: &ParquetRecordBatchReaderBuilder<File>,
) -> Option<ProjectionMask> {
    let file_schema = builder.schema();
    let indices = columns
        .iter()
        .filter_map(|name| {
            file_schema.index_of(name).map_or_else(
                |_| {
                    log_warning(
                        &format!("Column {name} not found in parquet file, skipping"),
                        None,
                    );
                    None
                },
                Some,
            )
        })
        .collect_vec();

    if indices.is_empty() {
        log_warning(
            "No matching columns found in projection, reading all columns",
            None,
        );
        None
    } else {
        Some(ProjectionMask::leaves(builder.parquet_schema(), indices))
    }
}

/// Read a Parquet file into Arrow record batches.
///
/// # Arguments
/// * `path` - Path to the Parquet file
/// * `columns` - Optional column names to project
/// * `batch_size` - Optional scanner batch size (default `DEFAULT_BATCH_SIZE`)
/// * `filter` - Optional row-level filter applied to every batch
///
/// Batches left empty by the filter are dropped.
pub fn read_parquet_file(
    path: &Path,
    columns: Option<&[String]>,
    batch_size: Option<usize>,
    filter: Option<&dyn BatchFilter>,
) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).map_err(|e| BucketError::io_with_path(e, path))?;

    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        create_parquet_error(&format!("Failed to read parquet file {}", path.display()), e)
    })?;
    builder = builder.with_batch_size(batch_size.unwrap_or(DEFAULT_BATCH_SIZE));

    if let Some(columns) = columns {
        if let Some(mask) = projection_for_columns(columns, &builder) {
            builder = builder.with_projection(mask);
        }
    }

    let reader = builder
        .build()
        .map_err(|e| create_parquet_error("Failed to build parquet reader", e))?;

    let mut batches = Vec::new();
    for batch_result in reader {
        let batch =
            batch_result.map_err(|e| create_parquet_error("Failed to read record batch", e))?;
        let batch = match filter {
            Some(filter) => filter.filter(&batch)?,
            None => batch,
        };
        if batch.num_rows() > 0 {
            batches.push(batch);
        }
    }
    Ok(batches)
}

/// Read the schema of a Parquet file without scanning its rows.
pub fn read_parquet_schema(path: &Path) -> Result<arrow::datatypes::SchemaRef> {
    let file = File::open(path).map_err(|e| BucketError::io_with_path(e, path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        create_parquet_error(&format!("Failed to read parquet file {}", path.display()), e)
    })?;
    Ok(builder.schema().clone())
}
