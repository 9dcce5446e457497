//! Ambient utilities: filesystem scanning, size parsing, logging and
//! low-level Parquet access.

pub mod directories;
pub mod logging;
pub mod parquet;
pub mod size;

pub use directories::validate_directory;
pub use parquet::DEFAULT_BATCH_SIZE;
pub use size::SizeSpec;
