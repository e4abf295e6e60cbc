//! Heightfield data model and the terrain queries a viewer runs against it:
//! grid geometry, two-layer snapshots, line intersection and surface sampling.

mod geometry;
mod intersect;
mod snapshot;

pub use geometry::{GeometryError, GridGeometry, MAX_GRID_SAMPLES, MAX_GRID_SIZE};
pub use intersect::{TerrainIntersector, intersect_grid};
pub use snapshot::HeightfieldSnapshot;
