use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use satbucket::testing::granule_filename;
use satbucket::{
    BucketMetadata, LonLatPartitioning, PartitioningFlavor, SpatialPartitioning,
};

/// Initialize logging once for the test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Ten-degree global grid used by the pipeline tests
#[must_use]
pub fn test_metadata() -> BucketMetadata {
    BucketMetadata::new(SpatialPartitioning::LonLat(
        LonLatPartitioning::new((10.0, 10.0), 0, PartitioningFlavor::Hive).unwrap(),
    ))
}

#[must_use]
pub fn day_time(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 7, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Paths of consecutive synthetic granules, one per hour starting at
/// midnight of the given day
#[must_use]
pub fn granule_paths(day: u32, count: u32) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let start = day_time(day, i, 0);
            let end = day_time(day, i, 30);
            PathBuf::from(granule_filename("2A-TEST", start, end, u64::from(i) + 1))
        })
        .collect()
}

#[must_use]
pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

/// Relative paths of all Parquet files below a directory, sorted
#[must_use]
pub fn parquet_files_below(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect_parquet(root, root, &mut files);
    files.sort();
    files
}

fn collect_parquet(root: &Path, dir: &Path, files: &mut Vec<String>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_parquet(root, &path, files);
        } else if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            files.push(
                path.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string(),
            );
        }
    }
}
