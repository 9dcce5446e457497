//! End-to-end pipeline: bucket synthetic granules, consolidate them and
//! query the result.

mod utils;

use arrow::array::Float64Array;
use satbucket::testing::{synthetic_granule_reader, test_patterns};
use satbucket::{
    BucketMetadata, Expr, Extent, LiteralValue, MergeOptions, ProcessingOptions, ReadOptions,
    TemporalPartitioning, WriterOptions, merge_granule_buckets, read_bucket, read_bucket_concat,
    write_granules_bucket, write_granules_bucket_async,
};
use tempfile::TempDir;
use utils::{day_time, granule_paths, parquet_files_below, test_metadata, total_rows};

// 3 granules, 30 minutes each, 2 cross-track positions: 1800 s * 2
const ROWS_PER_GRANULE: usize = 3600;

fn build_granule_bucket(bucket: &std::path::Path) {
    utils::init_logging();
    let failures = write_granules_bucket(
        &granule_paths(5, 3),
        bucket,
        &test_metadata(),
        &synthetic_granule_reader(2),
        &WriterOptions::default(),
        &ProcessingOptions::default(),
    )
    .unwrap();
    assert!(failures.is_empty());
}

#[test]
fn granule_bucketing_writes_metadata_and_prefixed_files() {
    let bucket = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());

    assert!(bucket.path().join("bucket_info.json").exists());
    let meta = BucketMetadata::read(bucket.path()).unwrap();
    assert!(meta.temporal.is_none());

    let files = parquet_files_below(bucket.path());
    assert!(!files.is_empty());
    // Every file is inside a two-level hive partition and carries its
    // granule's stem
    for file in &files {
        assert!(file.starts_with("lon_bin="), "unexpected path {file}");
        assert!(file.contains("/lat_bin="), "unexpected path {file}");
        assert!(file.contains("2A-TEST."), "unexpected path {file}");
    }

    let batches = read_bucket(bucket.path(), &ReadOptions::default()).unwrap();
    assert_eq!(total_rows(&batches), 3 * ROWS_PER_GRANULE);
}

#[tokio::test]
async fn async_granule_bucketing_produces_the_same_rows() {
    let bucket = TempDir::new().unwrap();
    let failures = write_granules_bucket_async(
        granule_paths(5, 3),
        bucket.path().to_path_buf(),
        test_metadata(),
        synthetic_granule_reader(2),
        WriterOptions::default(),
        ProcessingOptions {
            max_concurrent_tasks: Some(2),
            ..ProcessingOptions::default()
        },
    )
    .await
    .unwrap();
    assert!(failures.is_empty());

    let batches = read_bucket(bucket.path(), &ReadOptions::default()).unwrap();
    assert_eq!(total_rows(&batches), 3 * ROWS_PER_GRANULE);
}

#[test]
fn consolidation_groups_files_by_period_and_keeps_rows() {
    let bucket = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());

    let written = merge_granule_buckets(
        bucket.path(),
        archive.path(),
        &test_patterns(),
        &MergeOptions::default(),
    )
    .unwrap();
    assert!(written > 0);

    let meta = BucketMetadata::read(archive.path()).unwrap();
    assert_eq!(meta.temporal, Some(TemporalPartitioning::Year));

    let files = parquet_files_below(archive.path());
    for file in &files {
        let name = file.rsplit('/').next().unwrap();
        assert!(name.starts_with("2021_"), "unexpected file {name}");
    }

    let batches = read_bucket(archive.path(), &ReadOptions::default()).unwrap();
    assert_eq!(total_rows(&batches), 3 * ROWS_PER_GRANULE);
}

#[test]
fn time_window_read_selects_one_granule() {
    let bucket = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());

    let options = ReadOptions {
        start_time: Some(day_time(5, 1, 0)),
        end_time: Some(day_time(5, 2, 0)),
        ..ReadOptions::default()
    };
    let batches = read_bucket(bucket.path(), &options).unwrap();
    assert_eq!(total_rows(&batches), ROWS_PER_GRANULE);
}

#[test]
fn extent_read_returns_rows_inside_the_extent_only() {
    let bucket = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());

    let extent = Extent::new(-60.0, 0.0, -90.0, 0.0).unwrap();
    let options = ReadOptions {
        extent: Some(extent),
        ..ReadOptions::default()
    };
    let batches = read_bucket(bucket.path(), &options).unwrap();
    let rows = total_rows(&batches);
    assert!(rows > 0);
    assert!(rows < 3 * ROWS_PER_GRANULE);
    for batch in &batches {
        let lon = batch
            .column_by_name("lon")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        let lat = batch
            .column_by_name("lat")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        for i in 0..batch.num_rows() {
            assert!(extent.contains(lon.value(i), lat.value(i)));
        }
    }
}

#[test]
fn expression_filter_and_projection_compose() {
    let bucket = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());
    merge_granule_buckets(
        bucket.path(),
        archive.path(),
        &test_patterns(),
        &MergeOptions::default(),
    )
    .unwrap();

    let options = ReadOptions {
        columns: Some(vec!["value".to_string(), "time".to_string()]),
        filter: Some(Expr::Lt("value".to_string(), LiteralValue::Float(0.5))),
        ..ReadOptions::default()
    };
    let batch = read_bucket_concat(archive.path(), &options).unwrap();
    assert_eq!(batch.num_columns(), 2);
    assert!(batch.num_rows() > 0);
    assert!(batch.num_rows() < 3 * ROWS_PER_GRANULE);
    let values = batch
        .column_by_name("value")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    for i in 0..batch.num_rows() {
        assert!(values.value(i) < 0.5);
    }
}

#[test]
fn daily_update_merge_extends_an_archive() {
    let bucket = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    build_granule_bucket(bucket.path());

    let daily = MergeOptions {
        temporal: TemporalPartitioning::Day,
        ..MergeOptions::default()
    };
    merge_granule_buckets(bucket.path(), archive.path(), &test_patterns(), &daily).unwrap();
    let before = total_rows(&read_bucket(archive.path(), &ReadOptions::default()).unwrap());

    // A day of new granules lands in the granule bucket
    let failures = write_granules_bucket(
        &granule_paths(6, 2),
        bucket.path(),
        &test_metadata(),
        &synthetic_granule_reader(2),
        &WriterOptions::default(),
        &ProcessingOptions::default(),
    )
    .unwrap();
    assert!(failures.is_empty());

    let update = MergeOptions {
        temporal: TemporalPartitioning::Day,
        update: true,
        start_time: Some(day_time(6, 0, 0)),
        end_time: Some(day_time(7, 0, 0)),
        ..MergeOptions::default()
    };
    merge_granule_buckets(bucket.path(), archive.path(), &test_patterns(), &update).unwrap();

    let after = total_rows(&read_bucket(archive.path(), &ReadOptions::default()).unwrap());
    assert_eq!(after, before + 2 * ROWS_PER_GRANULE);

    // Rerunning the same update window must not duplicate rows
    merge_granule_buckets(bucket.path(), archive.path(), &test_patterns(), &update).unwrap();
    let rerun = total_rows(&read_bucket(archive.path(), &ReadOptions::default()).unwrap());
    assert_eq!(rerun, after);
}
