//! Bucketing of already-loaded tables.
//!
//! For data that fits in memory (a campaign of point measurements, a
//! station table), the granule machinery is unnecessary: the batches are
//! partitioned and written in one pass.

use std::path::Path;
use std::time::Instant;

use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::meta::BucketMetadata;
use crate::utils::logging::{log_operation_complete, log_operation_start};
use crate::writer::{WriterOptions, write_partitioned_batches};

/// Default file-stem prefix for table bucket files
pub const TABLE_FILE_PREFIX: &str = "part";

/// Write in-memory record batches as a bucket archive.
///
/// Writes the bucket metadata, partitions the rows spatially and stores
/// each partition as `part_{i}.parquet` files. Returns the number of
/// files written.
pub fn write_bucket(
    batches: &[RecordBatch],
    bucket_dir: &Path,
    metadata: &BucketMetadata,
    writer_options: &WriterOptions,
) -> Result<usize> {
    let started = Instant::now();
    log_operation_start("Bucketing table into", bucket_dir);
    metadata.write(bucket_dir)?;
    let files = write_partitioned_batches(
        batches,
        bucket_dir,
        &metadata.spatial,
        TABLE_FILE_PREFIX,
        writer_options,
    )?;
    log_operation_complete("wrote", bucket_dir, files, Some(started.elapsed()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Float64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use tempfile::TempDir;

    use super::*;
    use crate::partition::{LonLatPartitioning, PartitioningFlavor, SpatialPartitioning};

    #[test]
    fn writes_table_as_bucket() {
        let dir = TempDir::new().unwrap();
        let metadata = BucketMetadata::new(SpatialPartitioning::LonLat(
            LonLatPartitioning::new((10.0, 10.0), 0, PartitioningFlavor::Hive).unwrap(),
        ));
        let schema = Arc::new(Schema::new(vec![
            Field::new("lon", DataType::Float64, true),
            Field::new("lat", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![0.5, -100.0])),
                Arc::new(Float64Array::from(vec![0.5, 30.0])),
            ],
        )
        .unwrap();

        let files = write_bucket(&[batch], dir.path(), &metadata, &WriterOptions::default())
            .unwrap();
        assert_eq!(files, 2);
        assert!(
            dir.path()
                .join("lon_bin=5/lat_bin=5/part_0.parquet")
                .exists()
        );
        assert!(dir.path().join("bucket_info.json").exists());
    }
}
