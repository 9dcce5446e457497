//! A Rust library for building geographic bucket archives of satellite
//! data: granules are split into spatially partitioned Parquet files,
//! consolidated into temporally grouped archives and queried back with
//! extent, time and expression filters.

pub mod error;
pub mod filter;
pub mod meta;
pub mod partition;
pub mod pattern;
pub mod reader;
pub mod routines;
pub mod testing;
pub mod utils;
pub mod writer;

// Re-export the most common types for easier use
// Core types
pub use error::{BucketError, Result};
pub use meta::{BUCKET_METADATA_FILENAME, BucketMetadata};

// Partitioning schemes
pub use partition::{
    Extent, LonLatPartitioning, PartitioningFlavor, SpatialPartitioning, TemporalPartitioning,
    TilePartitioning, XyPartitioning,
};

// Arrow types
pub use arrow::datatypes::Schema as ArrowSchema;
pub use arrow::record_batch::RecordBatch;

// Filename parsing
pub use pattern::{FilenamePattern, GranuleInfo};

// Filtering capabilities
pub use filter::{Expr, LiteralValue, evaluate_expr, filter_record_batch};

// Bucketing routines and queries
pub use reader::{ReadOptions, read_bucket, read_bucket_concat};
pub use routines::{
    MergeOptions, ProcessingOptions, merge_granule_buckets, write_bucket, write_granule_bucket,
    write_granules_bucket, write_granules_bucket_async,
};
pub use writer::{CompressionCodec, WriterOptions};
