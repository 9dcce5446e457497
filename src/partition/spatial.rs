//! Spatial partitioning schemes.
//!
//! Rows are assigned to grid cells from their coordinate columns; a cell
//! maps to a relative directory below the bucket root. Partition labels
//! are cell centers (or tile indices), so a label identifies its cell
//! without further metadata.
//!
//! Choose cell sizes with the directory count in mind. A global lon/lat
//! grid partitioned by:
//! - 1 degree corresponds to 64800 directories (360*180)
//! - 5 degrees corresponds to 2592 directories (72*36)
//! - 10 degrees corresponds to 648 directories (36*18)
//! - 15 degrees corresponds to 288 directories (24*12)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{BucketError, Result};

/// Partition labels for one row (at most two levels)
pub type Labels = SmallVec<[String; 2]>;

/// Axis-aligned bounds used for partition grids and extent queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Extent {
    /// The whole-globe lon/lat extent
    pub const GLOBE: Self = Self {
        xmin: -180.0,
        xmax: 180.0,
        ymin: -90.0,
        ymax: 90.0,
    };

    /// Create a checked extent
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Result<Self> {
        if !(xmin.is_finite() && xmax.is_finite() && ymin.is_finite() && ymax.is_finite()) {
            return Err(BucketError::Partitioning(
                "Extent bounds must be finite".to_string(),
            ));
        }
        if xmin >= xmax || ymin >= ymax {
            return Err(BucketError::Partitioning(format!(
                "Invalid extent [{xmin}, {xmax}] x [{ymin}, {ymax}]"
            )));
        }
        Ok(Self {
            xmin,
            xmax,
            ymin,
            ymax,
        })
    }

    /// Whether a point lies inside the extent (closing edges included)
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    /// Whether two extents overlap
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.xmin <= other.xmax
            && self.xmax >= other.xmin
            && self.ymin <= other.ymax
            && self.ymax >= other.ymin
    }
}

/// Directory naming convention for partition levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitioningFlavor {
    /// `lon_bin=-178/lat_bin=2`
    #[default]
    Hive,
    /// `-178/2`
    Directory,
}

/// Regular two-level grid over a planar extent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyPartitioning {
    /// Cell size along x and y
    pub size: (f64, f64),
    /// Grid bounds
    pub extent: Extent,
    /// Partition level names (x level first)
    pub levels: (String, String),
    /// Decimals used when formatting cell-center labels
    pub labels_decimals: usize,
    /// Directory naming convention
    pub flavor: PartitioningFlavor,
}

impl XyPartitioning {
    /// Create a checked grid partitioning.
    ///
    /// The label precision must be able to distinguish adjacent cell
    /// centers, so `10^-labels_decimals` must not exceed the cell size.
    pub fn new(
        size: (f64, f64),
        extent: Extent,
        levels: (String, String),
        labels_decimals: usize,
        flavor: PartitioningFlavor,
    ) -> Result<Self> {
        if !(size.0.is_finite() && size.1.is_finite()) || size.0 <= 0.0 || size.1 <= 0.0 {
            return Err(BucketError::Partitioning(format!(
                "Partition size must be positive, got ({}, {})",
                size.0, size.1
            )));
        }
        let step = 10f64.powi(-(labels_decimals as i32));
        if step > size.0 || step > size.1 {
            return Err(BucketError::Partitioning(format!(
                "labels_decimals={labels_decimals} cannot distinguish cells of size ({}, {})",
                size.0, size.1
            )));
        }
        Ok(Self {
            size,
            extent,
            levels,
            labels_decimals,
            flavor,
        })
    }

    /// Number of cells along x
    #[must_use]
    pub fn n_x(&self) -> usize {
        ((self.extent.xmax - self.extent.xmin) / self.size.0).ceil() as usize
    }

    /// Number of cells along y
    #[must_use]
    pub fn n_y(&self) -> usize {
        ((self.extent.ymax - self.extent.ymin) / self.size.1).ceil() as usize
    }

    /// Cell indices for a point, or `None` when outside the grid or not
    /// finite. Points on the closing edge fall into the last cell.
    #[must_use]
    pub fn cell_indices(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) || !self.extent.contains(x, y) {
            return None;
        }
        let ix = (((x - self.extent.xmin) / self.size.0) as usize).min(self.n_x() - 1);
        let iy = (((y - self.extent.ymin) / self.size.1) as usize).min(self.n_y() - 1);
        Some((ix, iy))
    }

    fn x_label(&self, ix: usize) -> String {
        let center = self.extent.xmin + self.size.0 * (ix as f64 + 0.5);
        format!("{center:.prec$}", prec = self.labels_decimals)
    }

    fn y_label(&self, iy: usize) -> String {
        let center = self.extent.ymin + self.size.1 * (iy as f64 + 0.5);
        format!("{center:.prec$}", prec = self.labels_decimals)
    }

    fn dir_for_indices(&self, ix: usize, iy: usize) -> String {
        match self.flavor {
            PartitioningFlavor::Hive => format!(
                "{}={}/{}={}",
                self.levels.0,
                self.x_label(ix),
                self.levels.1,
                self.y_label(iy)
            ),
            PartitioningFlavor::Directory => {
                format!("{}/{}", self.x_label(ix), self.y_label(iy))
            }
        }
    }

    /// Partition labels (cell centers) for a point
    #[must_use]
    pub fn labels(&self, x: f64, y: f64) -> Option<Labels> {
        let (ix, iy) = self.cell_indices(x, y)?;
        Some(SmallVec::from_vec(vec![self.x_label(ix), self.y_label(iy)]))
    }

    /// Relative partition directory for a point
    #[must_use]
    pub fn partition_dir(&self, x: f64, y: f64) -> Option<String> {
        let (ix, iy) = self.cell_indices(x, y)?;
        Some(self.dir_for_indices(ix, iy))
    }

    /// All partition directory trees, x-major
    #[must_use]
    pub fn directories(&self) -> Vec<String> {
        let (n_x, n_y) = (self.n_x(), self.n_y());
        let mut dirs = Vec::with_capacity(n_x * n_y);
        for ix in 0..n_x {
            for iy in 0..n_y {
                dirs.push(self.dir_for_indices(ix, iy));
            }
        }
        dirs
    }

    /// Directory trees of all cells intersecting a query extent
    #[must_use]
    pub fn directories_for_extent(&self, query: &Extent) -> Vec<String> {
        if !self.extent.intersects(query) {
            return Vec::new();
        }
        let clamp_x = |v: f64| v.clamp(self.extent.xmin, self.extent.xmax);
        let clamp_y = |v: f64| v.clamp(self.extent.ymin, self.extent.ymax);
        let (ix0, iy0) = self
            .cell_indices(clamp_x(query.xmin), clamp_y(query.ymin))
            .expect("clamped point is inside the grid");
        let (ix1, iy1) = self
            .cell_indices(clamp_x(query.xmax), clamp_y(query.ymax))
            .expect("clamped point is inside the grid");
        let mut dirs = Vec::with_capacity((ix1 - ix0 + 1) * (iy1 - iy0 + 1));
        for ix in ix0..=ix1 {
            for iy in iy0..=iy1 {
                dirs.push(self.dir_for_indices(ix, iy));
            }
        }
        dirs
    }

    /// Partition level names
    #[must_use]
    pub fn level_names(&self) -> Labels {
        SmallVec::from_vec(vec![self.levels.0.clone(), self.levels.1.clone()])
    }
}

/// Lon/lat grid over the whole globe with `lon_bin`/`lat_bin` levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LonLatPartitioning {
    /// Cell size in degrees (lon, lat)
    pub size: (f64, f64),
    /// Decimals used when formatting cell-center labels
    pub labels_decimals: usize,
    /// Directory naming convention
    pub flavor: PartitioningFlavor,
}

impl LonLatPartitioning {
    /// Create a checked lon/lat partitioning
    pub fn new(size: (f64, f64), labels_decimals: usize, flavor: PartitioningFlavor) -> Result<Self> {
        // Validation happens through the planar grid constructor
        XyPartitioning::new(
            size,
            Extent::GLOBE,
            ("lon_bin".to_string(), "lat_bin".to_string()),
            labels_decimals,
            flavor,
        )?;
        Ok(Self {
            size,
            labels_decimals,
            flavor,
        })
    }

    /// The equivalent planar grid
    #[must_use]
    pub fn grid(&self) -> XyPartitioning {
        XyPartitioning {
            size: self.size,
            extent: Extent::GLOBE,
            levels: ("lon_bin".to_string(), "lat_bin".to_string()),
            labels_decimals: self.labels_decimals,
            flavor: self.flavor,
        }
    }
}

/// Single-level tile scheme labeling cells `{ix}_{iy}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePartitioning {
    /// Cell size along x and y
    pub size: (f64, f64),
    /// Grid bounds
    pub extent: Extent,
    /// Partition level name
    pub level: String,
    /// Directory naming convention
    pub flavor: PartitioningFlavor,
}

impl TilePartitioning {
    /// Create a checked tile partitioning
    pub fn new(
        size: (f64, f64),
        extent: Extent,
        level: impl Into<String>,
        flavor: PartitioningFlavor,
    ) -> Result<Self> {
        if !(size.0.is_finite() && size.1.is_finite()) || size.0 <= 0.0 || size.1 <= 0.0 {
            return Err(BucketError::Partitioning(format!(
                "Partition size must be positive, got ({}, {})",
                size.0, size.1
            )));
        }
        Ok(Self {
            size,
            extent,
            level: level.into(),
            flavor,
        })
    }

    fn grid(&self) -> XyPartitioning {
        XyPartitioning {
            size: self.size,
            extent: self.extent,
            levels: (self.level.clone(), self.level.clone()),
            labels_decimals: 8,
            flavor: self.flavor,
        }
    }

    fn tile_dir(&self, ix: usize, iy: usize) -> String {
        match self.flavor {
            PartitioningFlavor::Hive => format!("{}={ix}_{iy}", self.level),
            PartitioningFlavor::Directory => format!("{ix}_{iy}"),
        }
    }

    /// Relative partition directory for a point
    #[must_use]
    pub fn partition_dir(&self, x: f64, y: f64) -> Option<String> {
        let (ix, iy) = self.grid().cell_indices(x, y)?;
        Some(self.tile_dir(ix, iy))
    }

    /// All tile directories, x-major
    #[must_use]
    pub fn directories(&self) -> Vec<String> {
        let grid = self.grid();
        let mut dirs = Vec::with_capacity(grid.n_x() * grid.n_y());
        for ix in 0..grid.n_x() {
            for iy in 0..grid.n_y() {
                dirs.push(self.tile_dir(ix, iy));
            }
        }
        dirs
    }

    /// Tile directories intersecting a query extent
    #[must_use]
    pub fn directories_for_extent(&self, query: &Extent) -> Vec<String> {
        let grid = self.grid();
        if !grid.extent.intersects(query) {
            return Vec::new();
        }
        let clamp_x = |v: f64| v.clamp(grid.extent.xmin, grid.extent.xmax);
        let clamp_y = |v: f64| v.clamp(grid.extent.ymin, grid.extent.ymax);
        let (ix0, iy0) = grid
            .cell_indices(clamp_x(query.xmin), clamp_y(query.ymin))
            .expect("clamped point is inside the grid");
        let (ix1, iy1) = grid
            .cell_indices(clamp_x(query.xmax), clamp_y(query.ymax))
            .expect("clamped point is inside the grid");
        let mut dirs = Vec::new();
        for ix in ix0..=ix1 {
            for iy in iy0..=iy1 {
                dirs.push(self.tile_dir(ix, iy));
            }
        }
        dirs
    }
}

/// Closed set of supported spatial partitioning schemes.
///
/// Serialized into bucket metadata so an archive can be reopened without
/// reconfiguring the scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum SpatialPartitioning {
    LonLat(LonLatPartitioning),
    Xy(XyPartitioning),
    Tile(TilePartitioning),
}

impl SpatialPartitioning {
    /// Partition level names
    #[must_use]
    pub fn levels(&self) -> Labels {
        match self {
            Self::LonLat(p) => p.grid().level_names(),
            Self::Xy(p) => p.level_names(),
            Self::Tile(p) => SmallVec::from_vec(vec![p.level.clone()]),
        }
    }

    /// Number of directory levels
    #[must_use]
    pub fn n_levels(&self) -> usize {
        match self {
            Self::LonLat(_) | Self::Xy(_) => 2,
            Self::Tile(_) => 1,
        }
    }

    /// Grid bounds
    #[must_use]
    pub fn extent(&self) -> Extent {
        match self {
            Self::LonLat(_) => Extent::GLOBE,
            Self::Xy(p) => p.extent,
            Self::Tile(p) => p.extent,
        }
    }

    /// Relative partition directory for a point, `None` when the point is
    /// outside the grid or not finite
    #[must_use]
    pub fn partition_dir(&self, x: f64, y: f64) -> Option<String> {
        match self {
            Self::LonLat(p) => p.grid().partition_dir(x, y),
            Self::Xy(p) => p.partition_dir(x, y),
            Self::Tile(p) => p.partition_dir(x, y),
        }
    }

    /// All partition directory trees
    #[must_use]
    pub fn directories(&self) -> Vec<String> {
        match self {
            Self::LonLat(p) => p.grid().directories(),
            Self::Xy(p) => p.directories(),
            Self::Tile(p) => p.directories(),
        }
    }

    /// Directory trees of all cells intersecting a query extent
    #[must_use]
    pub fn directories_for_extent(&self, query: &Extent) -> Vec<String> {
        match self {
            Self::LonLat(p) => p.grid().directories_for_extent(query),
            Self::Xy(p) => p.directories_for_extent(query),
            Self::Tile(p) => p.directories_for_extent(query),
        }
    }
}
