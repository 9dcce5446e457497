//! Bucket archive metadata.
//!
//! Every bucket root carries a `bucket_info.json` describing its spatial
//! partitioning (and, once consolidated, its temporal partitioning).
//! Readers and merge routines reopen an archive from this file alone.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BucketError, Result};
use crate::partition::{SpatialPartitioning, TemporalPartitioning};

/// Metadata file stored at the bucket root
pub const BUCKET_METADATA_FILENAME: &str = "bucket_info.json";

/// Persistent description of a bucket archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMetadata {
    /// Spatial partitioning of the archive
    pub spatial: SpatialPartitioning,
    /// Temporal partitioning, set by consolidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalPartitioning>,
}

impl BucketMetadata {
    /// Metadata for a granule bucket (no temporal grouping yet)
    #[must_use]
    pub fn new(spatial: SpatialPartitioning) -> Self {
        Self {
            spatial,
            temporal: None,
        }
    }

    /// Metadata for a consolidated bucket
    #[must_use]
    pub fn with_temporal(spatial: SpatialPartitioning, temporal: TemporalPartitioning) -> Self {
        Self {
            spatial,
            temporal: Some(temporal),
        }
    }

    fn metadata_path(bucket_dir: &Path) -> PathBuf {
        bucket_dir.join(BUCKET_METADATA_FILENAME)
    }

    /// Write the metadata file, creating the bucket directory if needed.
    ///
    /// Rewriting identical metadata is a no-op; writing conflicting
    /// metadata into an existing bucket is an error, since the directory
    /// layout on disk would no longer match the description.
    pub fn write(&self, bucket_dir: &Path) -> Result<()> {
        fs::create_dir_all(bucket_dir).map_err(|e| BucketError::io_with_path(e, bucket_dir))?;
        let path = Self::metadata_path(bucket_dir);
        if path.exists() {
            let existing = Self::read(bucket_dir)?;
            if existing == *self {
                return Ok(());
            }
            return Err(BucketError::Metadata(format!(
                "Bucket {} already has conflicting metadata; refusing to overwrite {}",
                bucket_dir.display(),
                BUCKET_METADATA_FILENAME
            )));
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| BucketError::io_with_path(e, &path))?;
        Ok(())
    }

    /// Read the metadata file of an existing bucket.
    pub fn read(bucket_dir: &Path) -> Result<Self> {
        let path = Self::metadata_path(bucket_dir);
        if !path.exists() {
            return Err(BucketError::Metadata(format!(
                "{} is not a bucket archive: {} not found",
                bucket_dir.display(),
                BUCKET_METADATA_FILENAME
            )));
        }
        let json = fs::read_to_string(&path).map_err(|e| BucketError::io_with_path(e, &path))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Absolute partition directories of the bucket that exist on disk.
    ///
    /// The scheme enumerates every possible cell; only cells that received
    /// data have a directory.
    #[must_use]
    pub fn existing_partition_paths(&self, bucket_dir: &Path) -> Vec<PathBuf> {
        self.spatial
            .directories()
            .into_iter()
            .map(|tree| bucket_dir.join(tree))
            .filter(|path| path.is_dir())
            .collect()
    }
}
