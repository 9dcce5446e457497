//! Partitioned Parquet writing.
//!
//! Record batches are split by spatial partition from their coordinate
//! columns, then each partition's rows are written into one or more
//! Parquet files below the partition directory. File splitting and row
//! group sizing honor byte targets scaled to the batch footprint.

use std::fs::{self, File};
use std::path::Path;

use arrow::array::{Array, Float32Array, Float64Array, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{BrotliLevel, Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use rustc_hash::FxHashMap;

use crate::error::{BucketError, Result};
use crate::partition::SpatialPartitioning;
use crate::utils::SizeSpec;
use crate::utils::logging::log_warning;
use crate::utils::parquet::create_parquet_error;

/// Compression codec for bucket files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    Uncompressed,
    Snappy,
    Gzip,
    Brotli,
    Lz4,
    Zstd,
}

/// Options controlling partitioned Parquet writes
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Row group size limit
    pub row_group_size: SizeSpec,
    /// File size limit; larger partitions are split into numbered files
    pub max_file_size: SizeSpec,
    /// Compression codec
    pub compression: CompressionCodec,
    /// Codec-specific compression level, where the codec supports one
    pub compression_level: Option<i32>,
    /// Whether to write column statistics
    pub write_statistics: bool,
    /// Name of the x coordinate column
    pub x_col: String,
    /// Name of the y coordinate column
    pub y_col: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            row_group_size: SizeSpec::Bytes(500 * (1 << 20)),
            max_file_size: SizeSpec::Bytes(2 << 30),
            compression: CompressionCodec::Snappy,
            compression_level: None,
            write_statistics: false,
            x_col: "lon".to_string(),
            y_col: "lat".to_string(),
        }
    }
}

impl WriterOptions {
    fn parquet_compression(&self) -> Result<Compression> {
        let level = self.compression_level;
        let compression = match self.compression {
            CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Gzip => match level {
                Some(l) => Compression::GZIP(
                    GzipLevel::try_new(u32::try_from(l).unwrap_or(u32::MAX))
                        .map_err(|e| create_parquet_error("Invalid gzip level", e))?,
                ),
                None => Compression::GZIP(GzipLevel::default()),
            },
            CompressionCodec::Brotli => match level {
                Some(l) => Compression::BROTLI(
                    BrotliLevel::try_new(u32::try_from(l).unwrap_or(u32::MAX))
                        .map_err(|e| create_parquet_error("Invalid brotli level", e))?,
                ),
                None => Compression::BROTLI(BrotliLevel::default()),
            },
            CompressionCodec::Lz4 => Compression::LZ4_RAW,
            CompressionCodec::Zstd => match level {
                Some(l) => Compression::ZSTD(
                    ZstdLevel::try_new(l)
                        .map_err(|e| create_parquet_error("Invalid zstd level", e))?,
                ),
                None => Compression::ZSTD(ZstdLevel::default()),
            },
        };
        Ok(compression)
    }

    fn writer_properties(&self, row_group_rows: usize) -> Result<WriterProperties> {
        let statistics = if self.write_statistics {
            EnabledStatistics::Chunk
        } else {
            EnabledStatistics::None
        };
        Ok(WriterProperties::builder()
            .set_compression(self.parquet_compression()?)
            .set_max_row_group_size(row_group_rows)
            .set_statistics_enabled(statistics)
            .build())
    }
}

/// Coordinate column accessor supporting Float64 and Float32 storage
enum CoordColumn<'a> {
    F64(&'a Float64Array),
    F32(&'a Float32Array),
}

impl CoordColumn<'_> {
    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F64(a) => a.value(row),
            Self::F32(a) => f64::from(a.value(row)),
        }
    }

    fn is_null(&self, row: usize) -> bool {
        match self {
            Self::F64(a) => a.is_null(row),
            Self::F32(a) => a.is_null(row),
        }
    }
}

fn coord_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<CoordColumn<'a>> {
    let index = batch.schema().index_of(name).map_err(|_| {
        BucketError::Partitioning(format!("Coordinate column '{name}' not found in batch"))
    })?;
    let array = batch.column(index);
    if let Some(a) = array.as_any().downcast_ref::<Float64Array>() {
        return Ok(CoordColumn::F64(a));
    }
    if let Some(a) = array.as_any().downcast_ref::<Float32Array>() {
        return Ok(CoordColumn::F32(a));
    }
    Err(BucketError::Partitioning(format!(
        "Coordinate column '{name}' must be Float64 or Float32, got {}",
        array.data_type()
    )))
}

/// Split a batch into per-partition sub-batches.
///
/// Rows with null, non-finite or out-of-grid coordinates are dropped and
/// counted; callers log the count once per batch.
pub fn split_by_partition(
    batch: &RecordBatch,
    partitioning: &SpatialPartitioning,
    x_col: &str,
    y_col: &str,
) -> Result<(FxHashMap<String, RecordBatch>, usize)> {
    let x = coord_column(batch, x_col)?;
    let y = coord_column(batch, y_col)?;

    let mut groups: FxHashMap<String, Vec<u32>> = FxHashMap::default();
    let mut dropped = 0usize;
    for row in 0..batch.num_rows() {
        if x.is_null(row) || y.is_null(row) {
            dropped += 1;
            continue;
        }
        match partitioning.partition_dir(x.value(row), y.value(row)) {
            Some(dir) => groups.entry(dir).or_default().push(row as u32),
            None => dropped += 1,
        }
    }

    let mut partitions = FxHashMap::default();
    for (dir, indices) in groups {
        let indices = UInt32Array::from(indices);
        let columns = batch
            .columns()
            .iter()
            .map(|column| take(column.as_ref(), &indices, None))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let sub_batch = RecordBatch::try_new(batch.schema(), columns)?;
        partitions.insert(dir, sub_batch);
    }
    Ok((partitions, dropped))
}

/// Write a batch into a directory as `{prefix}_{i}.parquet` files.
///
/// The batch is split by `max_file_size`; each file gets row groups sized
/// by `row_group_size`. Returns the number of files written.
pub fn write_batch_to_dir(
    batch: &RecordBatch,
    dir: &Path,
    prefix: &str,
    options: &WriterOptions,
) -> Result<usize> {
    if batch.num_rows() == 0 {
        return Ok(0);
    }
    fs::create_dir_all(dir).map_err(|e| BucketError::io_with_path(e, dir))?;

    let rows_per_file = options.max_file_size.rows_for_batch(batch);
    let rows_per_group = options.row_group_size.rows_for_batch(batch).min(rows_per_file);
    let properties = options.writer_properties(rows_per_group)?;

    let mut files = 0usize;
    let mut offset = 0usize;
    while offset < batch.num_rows() {
        let length = rows_per_file.min(batch.num_rows() - offset);
        let slice = batch.slice(offset, length);
        let path = dir.join(format!("{prefix}_{files}.parquet"));
        let file = File::create(&path).map_err(|e| BucketError::io_with_path(e, &path))?;
        let mut writer = ArrowWriter::try_new(file, slice.schema(), Some(properties.clone()))
            .map_err(|e| {
                create_parquet_error(&format!("Failed to create {}", path.display()), e)
            })?;
        writer
            .write(&slice)
            .map_err(|e| create_parquet_error(&format!("Failed to write {}", path.display()), e))?;
        writer
            .close()
            .map_err(|e| create_parquet_error(&format!("Failed to close {}", path.display()), e))?;
        offset += length;
        files += 1;
    }
    Ok(files)
}

/// Write record batches into a bucket, one Parquet file set per partition.
///
/// All batches must share a schema. Files are named `{prefix}_{i}.parquet`
/// inside each partition directory, so distinct prefixes never overwrite
/// each other. Returns the number of files written.
pub fn write_partitioned_batches(
    batches: &[RecordBatch],
    bucket_dir: &Path,
    partitioning: &SpatialPartitioning,
    prefix: &str,
    options: &WriterOptions,
) -> Result<usize> {
    let mut per_partition: FxHashMap<String, Vec<RecordBatch>> = FxHashMap::default();
    let mut dropped = 0usize;
    for batch in batches {
        let (partitions, batch_dropped) =
            split_by_partition(batch, partitioning, &options.x_col, &options.y_col)?;
        dropped += batch_dropped;
        for (dir, sub_batch) in partitions {
            per_partition.entry(dir).or_default().push(sub_batch);
        }
    }
    if dropped > 0 {
        log_warning(
            &format!("Dropped {dropped} rows with missing or out-of-grid coordinates"),
            None,
        );
    }

    let mut files = 0usize;
    for (dir, partition_batches) in per_partition {
        let schema = partition_batches[0].schema();
        let merged = concat_batches(&schema, &partition_batches)?;
        files += write_batch_to_dir(&merged, &bucket_dir.join(dir), prefix, options)?;
    }
    Ok(files)
}
