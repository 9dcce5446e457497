//! High-level bucketing routines.
//!
//! The archive lifecycle has three steps: bucket granules (or an
//! in-memory table) into per-granule partitioned files, consolidate those
//! into large temporally grouped files, and read the result back with the
//! query layer in [`crate::reader`].

pub mod granules;
pub mod merge;
pub mod table;

pub use granules::{
    GranuleFailure, GranuleReader, ProcessingOptions, write_granule_bucket, write_granules_bucket,
    write_granules_bucket_async,
};
pub use merge::{MergeOptions, merge_granule_buckets};
pub use table::write_bucket;
