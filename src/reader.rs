//! Querying bucket archives.
//!
//! A read opens the bucket metadata, prunes partition directories with
//! the query extent, scans the surviving Parquet files in parallel and
//! pushes the row-level predicates (extent bounds, time window, user
//! expression) down to every file scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use itertools::Itertools;
use rayon::prelude::*;

use crate::error::Result;
use crate::filter::{BatchFilter, Expr, ExpressionFilter};
use crate::meta::BucketMetadata;
use crate::partition::Extent;
use crate::utils::DEFAULT_BATCH_SIZE;
use crate::utils::directories::files_in_dirs;
use crate::utils::logging::{log_operation_complete, log_operation_start};
use crate::utils::parquet::read_parquet_file;

/// Options controlling a bucket read
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Spatial query bounds; prunes partitions and filters rows
    pub extent: Option<Extent>,
    /// Start of the time window (inclusive)
    pub start_time: Option<NaiveDateTime>,
    /// End of the time window (exclusive)
    pub end_time: Option<NaiveDateTime>,
    /// Columns to return; `None` returns all
    pub columns: Option<Vec<String>>,
    /// Additional row predicate
    pub filter: Option<Expr>,
    /// Scanner batch size
    pub batch_size: usize,
    /// Name of the x coordinate column
    pub x_col: String,
    /// Name of the y coordinate column
    pub y_col: String,
    /// Name of the timestamp column
    pub time_col: String,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            extent: None,
            start_time: None,
            end_time: None,
            columns: None,
            filter: None,
            batch_size: DEFAULT_BATCH_SIZE,
            x_col: "lon".to_string(),
            y_col: "lat".to_string(),
            time_col: "time".to_string(),
        }
    }
}

impl ReadOptions {
    /// Combined row predicate for this read, if any
    fn combined_expr(&self) -> Result<Option<Expr>> {
        let mut parts = Vec::new();
        if let Some(extent) = &self.extent {
            parts.push(Expr::within_extent(&self.x_col, &self.y_col, extent));
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => {
                parts.push(Expr::time_range(&self.time_col, start, end));
            }
            (Some(start), Some(end)) => {
                return Err(anyhow::anyhow!(
                    "Time window start {start} is not before end {end}"
                )
                .into());
            }
            (None, None) => {}
            _ => {
                return Err(
                    anyhow::anyhow!("Time window needs both start_time and end_time").into(),
                );
            }
        }
        if let Some(filter) = &self.filter {
            parts.push(filter.clone());
        }
        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Expr::And(parts)),
        })
    }

    /// Columns projected at scan time: the requested output columns plus
    /// whatever the predicates need
    fn scan_columns(&self, expr: Option<&Expr>) -> Option<Vec<String>> {
        let requested = self.columns.as_ref()?;
        let mut columns: Vec<String> = requested.clone();
        if let Some(expr) = expr {
            let present: HashSet<&String> = columns.iter().collect();
            let extra = expr
                .required_columns()
                .into_iter()
                .filter(|c| !present.contains(c))
                .sorted()
                .collect_vec();
            columns.extend(extra);
        }
        Some(columns)
    }
}

fn partition_dirs(
    bucket_dir: &Path,
    metadata: &BucketMetadata,
    extent: Option<&Extent>,
) -> Vec<PathBuf> {
    let trees = match extent {
        Some(extent) => metadata.spatial.directories_for_extent(extent),
        None => metadata.spatial.directories(),
    };
    trees
        .into_iter()
        .map(|tree| bucket_dir.join(tree))
        .filter(|path| path.is_dir())
        .collect()
}

/// Read a bucket archive into record batches.
///
/// Returns the projected columns only; the predicate columns are trimmed
/// back out after filtering when they were not requested.
pub fn read_bucket(bucket_dir: &Path, options: &ReadOptions) -> Result<Vec<RecordBatch>> {
    let started = Instant::now();
    log_operation_start("Reading bucket", bucket_dir);

    let metadata = BucketMetadata::read(bucket_dir)?;
    let dirs = partition_dirs(bucket_dir, &metadata, options.extent.as_ref());
    let files = files_in_dirs(&dirs, Some("parquet"))?;

    let expr = options.combined_expr()?;
    let scan_columns = options.scan_columns(expr.as_ref());
    let filter = expr.map(ExpressionFilter::new);
    let filter_ref = filter.as_ref().map(|f| f as &dyn BatchFilter);

    let batches: Vec<RecordBatch> = files
        .par_iter()
        .map(|file| {
            read_parquet_file(
                file,
                scan_columns.as_deref(),
                Some(options.batch_size),
                filter_ref,
            )
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    let batches = match &options.columns {
        Some(columns) => batches
            .into_iter()
            .map(|batch| project_columns(&batch, columns))
            .collect::<Result<Vec<_>>>()?,
        None => batches,
    };

    log_operation_complete(
        "read",
        bucket_dir,
        batches.iter().map(RecordBatch::num_rows).sum(),
        Some(started.elapsed()),
    );
    Ok(batches)
}

/// Read a bucket archive into a single record batch.
///
/// Returns an error when nothing matched, since there is no schema to
/// build an empty batch from.
pub fn read_bucket_concat(bucket_dir: &Path, options: &ReadOptions) -> Result<RecordBatch> {
    let batches = read_bucket(bucket_dir, options)?;
    let schema = batches.first().map(RecordBatch::schema).ok_or_else(|| {
        anyhow::anyhow!("No rows matched the query in bucket {}", bucket_dir.display())
    })?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Keep only the requested columns, in the requested order.
///
/// Columns missing from the batch are skipped, consistent with the scan
/// projection.
fn project_columns(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .filter_map(|name| schema.index_of(name).ok())
        .collect_vec();
    Ok(batch.project(&indices)?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float64Array, TimestampMicrosecondArray};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;
    use crate::filter::LiteralValue;
    use crate::meta::BucketMetadata;
    use crate::partition::{LonLatPartitioning, PartitioningFlavor, SpatialPartitioning};
    use crate::routines::write_bucket;
    use crate::writer::WriterOptions;

    fn build_bucket(dir: &Path) {
        let metadata = BucketMetadata::new(SpatialPartitioning::LonLat(
            LonLatPartitioning::new((10.0, 10.0), 0, PartitioningFlavor::Hive).unwrap(),
        ));
        let schema = Arc::new(Schema::new(vec![
            Field::new("lon", DataType::Float64, true),
            Field::new("lat", DataType::Float64, true),
            Field::new(
                "time",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new("value", DataType::Float64, true),
        ]));
        let t0 = NaiveDate::from_ymd_opt(2021, 7, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        let hour = 3_600_000_000i64;
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![0.5, 0.6, 100.0, -100.0])),
                Arc::new(Float64Array::from(vec![0.5, 0.6, 45.0, -45.0])),
                Arc::new(TimestampMicrosecondArray::from(vec![
                    t0,
                    t0 + hour,
                    t0 + 2 * hour,
                    t0 + 3 * hour,
                ])),
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0])),
            ],
        )
        .unwrap();
        write_bucket(&[batch], dir, &metadata, &WriterOptions::default()).unwrap();
    }

    #[test]
    fn extent_query_prunes_partitions_and_rows() {
        let dir = TempDir::new().unwrap();
        build_bucket(dir.path());

        let options = ReadOptions {
            extent: Some(Extent::new(-5.0, 5.0, -5.0, 5.0).unwrap()),
            ..ReadOptions::default()
        };
        let batch = read_bucket_concat(dir.path(), &options).unwrap();
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn time_window_filters_rows() {
        let dir = TempDir::new().unwrap();
        build_bucket(dir.path());

        let day = NaiveDate::from_ymd_opt(2021, 7, 5).unwrap();
        let options = ReadOptions {
            start_time: day.and_hms_opt(1, 0, 0),
            end_time: day.and_hms_opt(3, 0, 0),
            ..ReadOptions::default()
        };
        let batch = read_bucket_concat(dir.path(), &options).unwrap();
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn projection_keeps_requested_columns_only() {
        let dir = TempDir::new().unwrap();
        build_bucket(dir.path());

        let options = ReadOptions {
            columns: Some(vec!["value".to_string()]),
            filter: Some(Expr::Gt("lon".to_string(), LiteralValue::Float(50.0))),
            ..ReadOptions::default()
        };
        let batch = read_bucket_concat(dir.path(), &options).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.num_columns(), 1);
        assert_eq!(batch.schema().field(0).name(), "value");
    }

    #[test]
    fn empty_result_is_an_error_when_concatenating() {
        let dir = TempDir::new().unwrap();
        build_bucket(dir.path());

        let options = ReadOptions {
            extent: Some(Extent::new(150.0, 160.0, 80.0, 89.0).unwrap()),
            ..ReadOptions::default()
        };
        assert!(read_bucket(dir.path(), &options).unwrap().is_empty());
        assert!(read_bucket_concat(dir.path(), &options).is_err());
    }
}
