//! Consolidation of granule buckets.
//!
//! A granule bucket holds thousands of small per-granule files inside
//! every spatial partition. Merging groups them by temporal period and
//! rewrites each group as a few large Parquet files named
//! `{period_prefix}_{i}.parquet`, which is what the reader is optimized
//! for. In update mode an existing consolidated archive is extended with
//! a new time window; the affected period files are deleted and rebuilt.

use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use itertools::Itertools;

use crate::error::{BucketError, Result};
use crate::filter::{Expr, ExpressionFilter};
use crate::meta::BucketMetadata;
use crate::partition::{TemporalPartitioning, TimePeriod};
use crate::pattern::{FilenamePattern, start_end_times};
use crate::utils::DEFAULT_BATCH_SIZE;
use crate::utils::SizeSpec;
use crate::utils::directories::{list_files, remove_files_with_prefix};
use crate::utils::logging::{
    create_progress_bar, finish_progress_bar, log_operation_complete, log_operation_start,
};
use crate::utils::parquet::read_parquet_file;
use crate::writer::{WriterOptions, write_batch_to_dir};

/// Options controlling bucket consolidation
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Temporal grouping of the consolidated files
    pub temporal: TemporalPartitioning,
    /// Start of the merge window; mandatory in update mode
    pub start_time: Option<NaiveDateTime>,
    /// End of the merge window; mandatory in update mode
    pub end_time: Option<NaiveDateTime>,
    /// Extend an existing consolidated archive instead of creating one
    pub update: bool,
    /// Output sizing and compression
    pub writer: WriterOptions,
    /// Scanner batch size for the source files
    pub batch_size: usize,
    /// Drop source rows outside their temporal group. Requires the time
    /// column to be present; disable for buckets without one.
    pub filter_rows_by_time: bool,
    /// Name of the timestamp column
    pub time_col: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            temporal: TemporalPartitioning::Year,
            start_time: None,
            end_time: None,
            update: false,
            writer: WriterOptions {
                row_group_size: SizeSpec::Bytes(200 * (1 << 20)),
                ..WriterOptions::default()
            },
            batch_size: DEFAULT_BATCH_SIZE,
            filter_rows_by_time: true,
            time_col: "time".to_string(),
        }
    }
}

/// Merge window and temporal scheme resolved against the destination
struct MergePlan {
    temporal: TemporalPartitioning,
    window: Option<(NaiveDateTime, NaiveDateTime)>,
}

fn resolve_plan(
    src_meta: &BucketMetadata,
    dst_dir: &Path,
    options: &MergeOptions,
) -> Result<MergePlan> {
    let window = match (options.start_time, options.end_time) {
        (Some(start), Some(end)) if start < end => Some((start, end)),
        (Some(start), Some(end)) => {
            return Err(BucketError::Merge(format!(
                "Merge window start {start} is not before end {end}"
            )));
        }
        (None, None) => None,
        _ => {
            return Err(BucketError::Merge(
                "Merge window needs both start_time and end_time".to_string(),
            ));
        }
    };

    if options.update {
        let dst_meta = BucketMetadata::read(dst_dir)?;
        if dst_meta.spatial != src_meta.spatial {
            return Err(BucketError::Merge(
                "Source and destination spatial partitioning differ; \
                 repartitioning during merge is not supported"
                    .to_string(),
            ));
        }
        let temporal = dst_meta.temporal.ok_or_else(|| {
            BucketError::Merge(format!(
                "Destination {} has no temporal partitioning to update",
                dst_dir.display()
            ))
        })?;
        let window = window.ok_or_else(|| {
            BucketError::Merge(
                "Update merges need an explicit start_time and end_time".to_string(),
            )
        })?;
        Ok(MergePlan {
            temporal,
            window: Some(window),
        })
    } else {
        let dst_meta = BucketMetadata::with_temporal(src_meta.spatial.clone(), options.temporal);
        dst_meta.write(dst_dir)?;
        Ok(MergePlan {
            temporal: options.temporal,
            window,
        })
    }
}

/// Granule files of one partition paired with their time intervals
struct TimedFiles {
    files: Vec<PathBuf>,
    times: Vec<(NaiveDateTime, NaiveDateTime)>,
}

impl TimedFiles {
    fn collect(
        partition_dir: &Path,
        patterns: &[FilenamePattern],
        window: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> Result<Self> {
        let files = list_files(partition_dir, Some("parquet"))?;
        let times = start_end_times(&files, patterns)?;
        let (files, times) = match window {
            Some((start, end)) => files
                .into_iter()
                .zip(times)
                .filter(|(_, (f_start, f_end))| *f_start < end && *f_end >= start)
                .unzip(),
            None => (files, times),
        };
        Ok(Self { files, times })
    }

    fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Overall time span of the files (None when empty)
    fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.times.iter().map(|(s, _)| *s).min()?;
        let end = self.times.iter().map(|(_, e)| *e).max()?;
        // File intervals are inclusive of their end; periods are half-open
        Some((start, end + chrono::TimeDelta::microseconds(1)))
    }

    /// Files overlapping a temporal group
    fn in_period(&self, period: &TimePeriod) -> Vec<&PathBuf> {
        self.files
            .iter()
            .zip(&self.times)
            .filter(|(_, (f_start, f_end))| *f_start < period.end && *f_end >= period.start)
            .map(|(file, _)| file)
            .collect_vec()
    }
}

fn merge_period(
    files: &[&PathBuf],
    dst_partition: &Path,
    period: &TimePeriod,
    options: &MergeOptions,
) -> Result<usize> {
    let filter = if options.filter_rows_by_time {
        Some(ExpressionFilter::new(Expr::time_range(
            &options.time_col,
            period.start,
            period.end,
        )))
    } else {
        None
    };
    let filter_ref = filter.as_ref().map(|f| f as &dyn crate::filter::BatchFilter);

    let mut batches = Vec::new();
    for file in files {
        batches.extend(read_parquet_file(
            file,
            None,
            Some(options.batch_size),
            filter_ref,
        )?);
    }
    if batches.is_empty() {
        return Ok(0);
    }
    let schema = batches[0].schema();
    let merged = concat_batches(&schema, &batches)?;
    write_batch_to_dir(&merged, dst_partition, &period.prefix, &options.writer)
}

fn merge_partition(
    src_partition: &Path,
    dst_partition: &Path,
    patterns: &[FilenamePattern],
    plan: &MergePlan,
    options: &MergeOptions,
) -> Result<usize> {
    let timed = TimedFiles::collect(src_partition, patterns, plan.window)?;
    if timed.is_empty() {
        log::debug!(
            "No granule files in window for partition {}",
            src_partition.display()
        );
        return Ok(0);
    }

    if !options.update
        && dst_partition.is_dir()
        && !list_files(dst_partition, Some("parquet"))?.is_empty()
    {
        return Err(BucketError::Merge(format!(
            "Destination partition {} already contains consolidated files; \
             use update mode to extend it",
            dst_partition.display()
        )));
    }

    let (window_start, window_end) = match plan.window {
        Some(window) => window,
        None => timed.span().ok_or_else(|| {
            BucketError::Merge(format!(
                "No granule time span in {}",
                src_partition.display()
            ))
        })?,
    };

    let mut written = 0usize;
    for period in plan.temporal.periods(window_start, window_end)? {
        let period_files = timed.in_period(&period);
        if period_files.is_empty() {
            continue;
        }
        if options.update && dst_partition.is_dir() {
            remove_files_with_prefix(dst_partition, &period.prefix)?;
        }
        written += merge_period(&period_files, dst_partition, &period, options)?;
    }
    Ok(written)
}

/// Consolidate a granule bucket into a temporally grouped archive.
///
/// Source partitions are processed one at a time; within a partition the
/// granule files are grouped by the temporal scheme and each group is
/// rewritten as `{prefix}_{i}.parquet` files in the destination. The
/// file-name `patterns` recover each granule's time interval.
///
/// Returns the number of consolidated files written.
pub fn merge_granule_buckets(
    src_dir: &Path,
    dst_dir: &Path,
    patterns: &[FilenamePattern],
    options: &MergeOptions,
) -> Result<usize> {
    let started = Instant::now();
    log_operation_start("Merging granule bucket", src_dir);

    let src_meta = BucketMetadata::read(src_dir)?;
    let plan = resolve_plan(&src_meta, dst_dir, options)?;
    let partitions = src_meta.existing_partition_paths(src_dir);

    let progress = create_progress_bar(partitions.len() as u64, "Merging partitions");
    let mut written = 0usize;
    for src_partition in &partitions {
        let rel = src_partition
            .strip_prefix(src_dir)
            .map_err(|e| BucketError::Merge(format!("Partition outside bucket root: {e}")))?;
        written += merge_partition(src_partition, &dst_dir.join(rel), patterns, &plan, options)?;
        progress.inc(1);
    }
    finish_progress_bar(&progress, "Merge done");
    log_operation_complete("merged", dst_dir, written, Some(started.elapsed()));
    Ok(written)
}
