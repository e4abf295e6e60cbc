//! Grid geometry negotiated once per connection.

use glam::{UVec2, Vec2, Vec3};

/// Largest accepted sample count along either axis.
pub const MAX_GRID_SIZE: u32 = 16384;

/// Largest accepted `W x H`. Each side of a connection holds three snapshots,
/// so this bounds what a handshake can make a viewer allocate.
pub const MAX_GRID_SAMPLES: u64 = 1 << 22;

/// Errors produced when validating a [`GridGeometry`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("grid size {width}x{height} is too small (need at least 2 samples per axis)")]
    TooSmall { width: u32, height: u32 },

    #[error("grid size {width}x{height} exceeds the limit of {MAX_GRID_SIZE} per axis")]
    TooLarge { width: u32, height: u32 },

    #[error("grid size {width}x{height} exceeds the limit of {MAX_GRID_SAMPLES} samples")]
    TooManySamples { width: u32, height: u32 },

    #[error("cell size {0:?} must be finite and positive")]
    InvalidCellSize(Vec2),

    #[error("elevation range [{min}, {max}] is empty or not finite")]
    InvalidElevationRange { min: f32, max: f32 },
}

/// Vertex grid size, cell size and elevation range of a heightfield.
///
/// The terrain layer is sampled at cell centres, `(W-1) x (H-1)` values. The
/// water layer is sampled at vertices, `W x H` values. Both are row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    size: UVec2,
    cell_size: Vec2,
    elevation_min: f32,
    elevation_max: f32,
}

impl GridGeometry {
    /// Validate and build a geometry.
    pub fn new(
        size: UVec2,
        cell_size: Vec2,
        elevation_min: f32,
        elevation_max: f32,
    ) -> Result<Self, GeometryError> {
        if size.x < 2 || size.y < 2 {
            return Err(GeometryError::TooSmall {
                width: size.x,
                height: size.y,
            });
        }
        if size.x > MAX_GRID_SIZE || size.y > MAX_GRID_SIZE {
            return Err(GeometryError::TooLarge {
                width: size.x,
                height: size.y,
            });
        }
        if u64::from(size.x) * u64::from(size.y) > MAX_GRID_SAMPLES {
            return Err(GeometryError::TooManySamples {
                width: size.x,
                height: size.y,
            });
        }
        if !cell_size.is_finite() || cell_size.x <= 0.0 || cell_size.y <= 0.0 {
            return Err(GeometryError::InvalidCellSize(cell_size));
        }
        if !elevation_min.is_finite() || !elevation_max.is_finite() || elevation_min >= elevation_max
        {
            return Err(GeometryError::InvalidElevationRange {
                min: elevation_min,
                max: elevation_max,
            });
        }
        Ok(Self {
            size,
            cell_size,
            elevation_min,
            elevation_max,
        })
    }

    /// Build a geometry whose elevation range is the producer's domain widened
    /// by `margin` (a fraction of the range) on both ends.
    ///
    /// The upper bound is widened from the already-lowered lower bound, so the
    /// top gains slightly more than the bottom.
    pub fn with_elevation_margin(
        size: UVec2,
        cell_size: Vec2,
        domain_min: f32,
        domain_max: f32,
        margin: f32,
    ) -> Result<Self, GeometryError> {
        let mut min = domain_min;
        let mut max = domain_max;
        min -= (max - min) * margin;
        max += (max - min) * margin;
        Self::new(size, cell_size, min, max)
    }

    /// Vertex counts along x and y.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.x
    }

    pub fn height(&self) -> u32 {
        self.size.y
    }

    pub fn cell_size(&self) -> Vec2 {
        self.cell_size
    }

    pub fn elevation_min(&self) -> f32 {
        self.elevation_min
    }

    pub fn elevation_max(&self) -> f32 {
        self.elevation_max
    }

    /// Number of cell-centred terrain samples, `(W-1)(H-1)`.
    pub fn terrain_len(&self) -> usize {
        (self.size.x as usize - 1) * (self.size.y as usize - 1)
    }

    /// Number of vertex-centred water samples, `W*H`.
    pub fn water_len(&self) -> usize {
        self.size.x as usize * self.size.y as usize
    }

    /// World extent of the vertex grid.
    pub fn extent(&self) -> Vec2 {
        self.size.as_vec2() * self.cell_size
    }

    /// Offset of the grid centre from its origin corner, used to centre
    /// client poses on the grid.
    pub fn grid_offset(&self) -> Vec3 {
        (self.extent() * 0.5).extend(0.0)
    }
}
