//! Spatial and temporal partitioning of bucket archives.
//!
//! A bucket archive is laid out as one directory per spatial cell
//! (lon/lat grid, planar grid or tile ids) and, after consolidation, one
//! file group per temporal period inside every cell.

pub mod spatial;
pub mod temporal;

pub use spatial::{
    Extent, LonLatPartitioning, PartitioningFlavor, SpatialPartitioning, TilePartitioning,
    XyPartitioning,
};
pub use temporal::{TemporalPartitioning, TimePeriod};
