//! Granule-by-granule bucketing.
//!
//! Every granule file is opened by a caller-supplied reader, split into
//! spatial partitions and written as small Parquet files named after the
//! granule. Distinct granules never overwrite each other's output, so the
//! whole step is embarrassingly parallel and restartable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;

use rayon::prelude::*;

use crate::error::{BucketError, Result};
use crate::meta::BucketMetadata;
use crate::utils::logging::{
    create_progress_bar, finish_progress_bar, log_operation_complete, log_operation_start,
    log_warning,
};
use crate::writer::{WriterOptions, write_partitioned_batches};

/// Opens one granule file and converts it into record batches.
///
/// Returning `Ok(None)` skips the granule (empty orbit, no valid data).
pub type GranuleReader =
    Arc<dyn Fn(&Path) -> Result<Option<Vec<RecordBatch>>> + Send + Sync + 'static>;

/// A granule whose conversion failed, with the failure message
pub type GranuleFailure = (PathBuf, String);

/// Options controlling granule bucketing concurrency
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    /// Worker cap; `None` uses all cores
    pub max_concurrent_tasks: Option<usize>,
    /// Granules handled per scheduling block, bounding peak memory
    pub max_tasks_per_block: usize,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            max_tasks_per_block: 500,
        }
    }
}

impl ProcessingOptions {
    fn workers(&self) -> usize {
        self.max_concurrent_tasks.unwrap_or_else(num_cpus::get)
    }
}

fn granule_prefix(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            BucketError::Pattern(format!("Granule path {} has no file stem", path.display()))
        })
}

/// Bucket a single granule.
///
/// The output files are prefixed with the granule's file stem, so reruns
/// overwrite the granule's own files and nothing else.
pub fn write_granule_bucket(
    granule_path: &Path,
    bucket_dir: &Path,
    metadata: &BucketMetadata,
    reader: &GranuleReader,
    writer_options: &WriterOptions,
) -> Result<()> {
    let prefix = granule_prefix(granule_path)?;
    let Some(batches) = reader(granule_path)? else {
        return Ok(());
    };
    if batches.is_empty() {
        return Ok(());
    }
    write_partitioned_batches(&batches, bucket_dir, &metadata.spatial, &prefix, writer_options)?;
    Ok(())
}

fn process_block(
    block: &[PathBuf],
    bucket_dir: &Path,
    metadata: &BucketMetadata,
    reader: &GranuleReader,
    writer_options: &WriterOptions,
    progress: &ProgressBar,
) -> Vec<GranuleFailure> {
    block
        .par_iter()
        .filter_map(|path| {
            let result = write_granule_bucket(path, bucket_dir, metadata, reader, writer_options);
            progress.inc(1);
            match result {
                Ok(()) => None,
                Err(e) => Some((path.clone(), e.to_string())),
            }
        })
        .collect()
}

/// Bucket a set of granules in parallel with rayon.
///
/// Writes the bucket metadata first, then processes granules block by
/// block. Failures do not abort the run; they are logged and returned so
/// the caller can retry the failed granules.
pub fn write_granules_bucket(
    granule_paths: &[PathBuf],
    bucket_dir: &Path,
    metadata: &BucketMetadata,
    reader: &GranuleReader,
    writer_options: &WriterOptions,
    options: &ProcessingOptions,
) -> Result<Vec<GranuleFailure>> {
    let started = Instant::now();
    log_operation_start("Bucketing granules into", bucket_dir);
    metadata.write(bucket_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers())
        .build()
        .map_err(|e| BucketError::Other(anyhow::anyhow!("Failed to build thread pool: {e}")))?;

    let progress = create_progress_bar(granule_paths.len() as u64, "Bucketing granules");
    let mut failures = Vec::new();
    for block in granule_paths.chunks(options.max_tasks_per_block.max(1)) {
        failures.extend(pool.install(|| {
            process_block(block, bucket_dir, metadata, reader, writer_options, &progress)
        }));
    }
    finish_progress_bar(&progress, "Granule bucketing done");

    for (path, message) in &failures {
        log_warning(&format!("Granule failed: {message}"), Some(path));
    }
    log_operation_complete(
        "bucketed",
        bucket_dir,
        granule_paths.len() - failures.len(),
        Some(started.elapsed()),
    );
    Ok(failures)
}

/// Async variant of [`write_granules_bucket`].
///
/// Granule conversions run on the blocking thread pool with bounded
/// concurrency, leaving the async runtime free for other work.
pub async fn write_granules_bucket_async(
    granule_paths: Vec<PathBuf>,
    bucket_dir: PathBuf,
    metadata: BucketMetadata,
    reader: GranuleReader,
    writer_options: WriterOptions,
    options: ProcessingOptions,
) -> Result<Vec<GranuleFailure>> {
    let started = Instant::now();
    log_operation_start("Bucketing granules into", &bucket_dir);
    metadata.write(&bucket_dir)?;

    let total = granule_paths.len();
    let progress = create_progress_bar(total as u64, "Bucketing granules");
    let metadata = Arc::new(metadata);
    let writer_options = Arc::new(writer_options);
    let bucket_dir_arc = Arc::new(bucket_dir.clone());

    let results: Vec<Option<GranuleFailure>> = stream::iter(granule_paths)
        .map(|path| {
            let reader = Arc::clone(&reader);
            let metadata = Arc::clone(&metadata);
            let writer_options = Arc::clone(&writer_options);
            let bucket_dir = Arc::clone(&bucket_dir_arc);
            let progress = progress.clone();
            async move {
                let handle = tokio::task::spawn_blocking(move || {
                    let result = write_granule_bucket(
                        &path,
                        &bucket_dir,
                        &metadata,
                        &reader,
                        &writer_options,
                    );
                    (path, result)
                });
                let (path, result) = handle.await.map_err(|e| {
                    BucketError::Other(anyhow::anyhow!("Granule task panicked: {e}"))
                })?;
                progress.inc(1);
                Ok::<_, BucketError>(match result {
                    Ok(()) => None,
                    Err(e) => Some((path, e.to_string())),
                })
            }
        })
        .buffer_unordered(options.workers())
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_>>()?;

    finish_progress_bar(&progress, "Granule bucketing done");
    let failures: Vec<GranuleFailure> = results.into_iter().flatten().collect();
    for (path, message) in &failures {
        log_warning(&format!("Granule failed: {message}"), Some(path));
    }
    log_operation_complete(
        "bucketed",
        &bucket_dir,
        total - failures.len(),
        Some(started.elapsed()),
    );
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Float64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use tempfile::TempDir;

    use super::*;
    use crate::partition::{LonLatPartitioning, PartitioningFlavor, SpatialPartitioning};

    fn metadata() -> BucketMetadata {
        BucketMetadata::new(SpatialPartitioning::LonLat(
            LonLatPartitioning::new((10.0, 10.0), 0, PartitioningFlavor::Hive).unwrap(),
        ))
    }

    fn fixed_batch_reader() -> GranuleReader {
        Arc::new(|path: &Path| {
            if path.to_string_lossy().contains("empty") {
                return Ok(None);
            }
            if path.to_string_lossy().contains("broken") {
                return Err(BucketError::Pattern("unreadable granule".to_string()));
            }
            let schema = Arc::new(Schema::new(vec![
                Field::new("lon", DataType::Float64, true),
                Field::new("lat", DataType::Float64, true),
            ]));
            let batch = RecordBatch::try_new(
                schema,
                vec![
                    Arc::new(Float64Array::from(vec![0.5, 120.0])),
                    Arc::new(Float64Array::from(vec![0.5, 45.0])),
                ],
            )
            .unwrap();
            Ok(Some(vec![batch]))
        })
    }

    #[test]
    fn buckets_granules_and_reports_failures() {
        let dir = TempDir::new().unwrap();
        let paths = vec![
            PathBuf::from("granule-a.HDF5"),
            PathBuf::from("granule-empty.HDF5"),
            PathBuf::from("granule-broken.HDF5"),
        ];
        let failures = write_granules_bucket(
            &paths,
            dir.path(),
            &metadata(),
            &fixed_batch_reader(),
            &WriterOptions::default(),
            &ProcessingOptions::default(),
        )
        .unwrap();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].0.ends_with("granule-broken.HDF5"));
        assert!(
            dir.path()
                .join("lon_bin=5/lat_bin=5/granule-a_0.parquet")
                .exists()
        );
        assert!(
            dir.path()
                .join("lon_bin=125/lat_bin=45/granule-a_0.parquet")
                .exists()
        );
        assert!(dir.path().join("bucket_info.json").exists());
    }

    #[tokio::test]
    async fn async_bucketing_matches_sync() {
        let dir = TempDir::new().unwrap();
        let paths = vec![
            PathBuf::from("granule-a.HDF5"),
            PathBuf::from("granule-b.HDF5"),
        ];
        let failures = write_granules_bucket_async(
            paths,
            dir.path().to_path_buf(),
            metadata(),
            fixed_batch_reader(),
            WriterOptions::default(),
            ProcessingOptions {
                max_concurrent_tasks: Some(2),
                ..ProcessingOptions::default()
            },
        )
        .await
        .unwrap();

        assert!(failures.is_empty());
        let partition = dir.path().join("lon_bin=5/lat_bin=5");
        assert!(partition.join("granule-a_0.parquet").exists());
        assert!(partition.join("granule-b_0.parquet").exists());
    }
}
