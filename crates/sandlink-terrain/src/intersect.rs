//! Line-segment intersection and point sampling against a heightfield snapshot.
//!
//! Terrain samples sit at cell centres, so a world point `p` maps to terrain
//! grid space as `p / cell_size - 0.5`. Water samples sit on vertices and map
//! as `p / cell_size` with no offset.

use glam::{DVec3, UVec2, Vec2, Vec3};

use crate::geometry::GridGeometry;
use crate::snapshot::HeightfieldSnapshot;

/// Intersect a grid-space segment with the terrain layer.
///
/// `terrain` holds `(size.x - 1) * (size.y - 1)` cell-centred samples and
/// `size` is the vertex grid size. Returns the smallest parameter in `[0, 1)`
/// at which the segment meets the bilinear terrain surface, or `1.0` when it
/// never does.
pub fn intersect_grid(terrain: &[f32], size: UVec2, p0: DVec3, p1: DVec3) -> f64 {
    if size.x < 3 || size.y < 3 {
        return 1.0;
    }
    let stride = size.x as usize - 1;
    let last_cell = [size.x as i64 - 3, size.y as i64 - 3];
    let d = p1 - p0;

    // Clip the xy projection against the range covered by terrain samples.
    let mut l0 = 0.0f64;
    let mut l1 = 1.0f64;
    for axis in 0..2 {
        let (a, b) = (p0[axis], p1[axis]);

        let lower = 0.0;
        if a < lower {
            if b > lower {
                l0 = l0.max((lower - a) / d[axis]);
            } else {
                return 1.0;
            }
        } else if b < lower {
            if a > lower {
                l1 = l1.min((lower - a) / d[axis]);
            } else {
                return 1.0;
            }
        }

        let upper = (last_cell[axis] + 1) as f64;
        if a > upper {
            if b < upper {
                l0 = l0.max((upper - a) / d[axis]);
            } else {
                return 1.0;
            }
        } else if b > upper {
            if a < upper {
                l1 = l1.min((upper - a) / d[axis]);
            } else {
                return 1.0;
            }
        }
    }
    if l0 >= l1 {
        return 1.0;
    }

    let entry = p0 + d * l0;
    let mut cell = [
        (entry.x.floor() as i64).clamp(0, last_cell[0]),
        (entry.y.floor() as i64).clamp(0, last_cell[1]),
    ];

    let mut cl0 = l0;
    while cl0 < l1 {
        // Parameter at which the segment leaves the current cell, and through which axis.
        let mut cl1 = l1;
        let mut exit = None;
        for axis in 0..2 {
            let el = if p0[axis] < p1[axis] {
                ((cell[axis] + 1) as f64 - p0[axis]) / d[axis]
            } else if p0[axis] > p1[axis] {
                (cell[axis] as f64 - p0[axis]) / d[axis]
            } else {
                cl1
            };
            if cl1 > el {
                cl1 = el;
                exit = Some(axis);
            }
        }

        let il = intersect_cell(terrain, stride, cell, p0, d, cl0, cl1);
        if il >= cl0 && il < cl1 {
            return il;
        }

        if let Some(axis) = exit {
            cell[axis] += if d[axis] < 0.0 { -1 } else { 1 };
            if cell[axis] < 0 || cell[axis] > last_cell[axis] {
                break;
            }
        }
        cl0 = cl1;
    }
    1.0
}

/// Solve for the segment parameter where it meets the bilinear patch of one
/// cell. The result is only meaningful inside `[cl0, cl1)`.
fn intersect_cell(
    terrain: &[f32],
    stride: usize,
    cell: [i64; 2],
    p0: DVec3,
    d: DVec3,
    cl0: f64,
    cl1: f64,
) -> f64 {
    let base = cell[1] as usize * stride + cell[0] as usize;
    let c0 = terrain[base] as f64;
    let c1 = terrain[base + 1] as f64;
    let c2 = terrain[base + stride] as f64;
    let c3 = terrain[base + stride + 1] as f64;
    let cx0 = cell[0] as f64;
    let cx1 = cx0 + 1.0;
    let cy0 = cell[1] as f64;
    let cy1 = cy0 + 1.0;

    let fxy = c0 - c1 + c3 - c2;
    let fx = (c1 - c0) * cy1 - (c3 - c2) * cy0;
    let fy = (c2 - c0) * cx1 - (c3 - c1) * cx0;
    let f = (c0 * cx1 - c1 * cx0) * cy1 - (c2 * cx1 - c3 * cx0) * cy0;

    let a = fxy * d.x * d.y;
    let bc0 = fxy * p0.y + fx;
    let bc1 = fxy * p0.x + fy;
    let b = bc0 * d.x + bc1 * d.y - d.z;
    let c = bc0 * p0.x + bc1 * p0.y - p0.z - fxy * p0.x * p0.y + f;

    if a == 0.0 {
        return -c / b;
    }

    let det = b * b - 4.0 * a * c;
    if det < 0.0 {
        return cl1;
    }
    let det = det.sqrt();
    // Each root is taken in the form that avoids cancellation for the sign of b.
    let near = if b >= 0.0 { (-b - det) / (2.0 * a) } else { (2.0 * c) / (-b + det) };
    let far = if b >= 0.0 { (2.0 * c) / (-b - det) } else { (-b + det) / (2.0 * a) };
    let (first, second) = if a > 0.0 { (near, far) } else { (far, near) };
    if first < cl0 { second } else { first }
}

/// Read-only terrain queries over one locked snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TerrainIntersector<'a> {
    geometry: &'a GridGeometry,
    snapshot: &'a HeightfieldSnapshot,
}

impl<'a> TerrainIntersector<'a> {
    pub fn new(geometry: &'a GridGeometry, snapshot: &'a HeightfieldSnapshot) -> Self {
        Self { geometry, snapshot }
    }

    /// Intersect a grid-space segment with the terrain layer.
    pub fn intersect_grid(&self, p0: DVec3, p1: DVec3) -> f64 {
        intersect_grid(&self.snapshot.terrain, self.geometry.size(), p0, p1)
    }

    /// Intersect a world-space segment with the terrain layer.
    ///
    /// Returns the segment parameter of the first crossing, or `1.0`.
    pub fn intersect_line(&self, p0: Vec3, p1: Vec3) -> f32 {
        let g0 = self.to_terrain_grid(p0);
        let g1 = self.to_terrain_grid(p1);
        self.intersect_grid(g0, g1) as f32
    }

    /// Bilinear terrain height under a world-space point.
    ///
    /// Points outside the grid take the height of the nearest edge cell's
    /// patch, extrapolated. Returns `None` when the grid has no terrain cells.
    pub fn terrain_elevation(&self, point: Vec2) -> Option<f32> {
        let size = self.geometry.size();
        if size.x < 3 || size.y < 3 {
            return None;
        }
        let cell = self.geometry.cell_size().as_dvec2();
        let g = point.as_dvec2() / cell - 0.5;
        let gx = (g.x.floor() as i64).clamp(0, size.x as i64 - 3);
        let gy = (g.y.floor() as i64).clamp(0, size.y as i64 - 3);
        let stride = size.x as usize - 1;
        Some(bilinear(
            &self.snapshot.terrain,
            stride,
            gx as usize,
            gy as usize,
            g.x - gx as f64,
            g.y - gy as f64,
        ) as f32)
    }

    /// Bilinear water surface height at a world-space point, or `None` outside
    /// the vertex grid.
    pub fn water_level(&self, point: Vec2) -> Option<f32> {
        let size = self.geometry.size();
        let g = point.as_dvec2() / self.geometry.cell_size().as_dvec2();
        let gx = g.x.floor();
        let gy = g.y.floor();
        if gx < 0.0 || gx >= (size.x - 1) as f64 || gy < 0.0 || gy >= (size.y - 1) as f64 {
            return None;
        }
        Some(bilinear(
            &self.snapshot.water,
            size.x as usize,
            gx as usize,
            gy as usize,
            g.x - gx,
            g.y - gy,
        ) as f32)
    }

    /// Whether a world-space point is at or below the water surface.
    pub fn is_underwater(&self, head: Vec3) -> bool {
        self.water_level(head.truncate())
            .is_some_and(|water| head.z <= water)
    }

    fn to_terrain_grid(&self, p: Vec3) -> DVec3 {
        let cell = self.geometry.cell_size().as_dvec2();
        let xy = p.truncate().as_dvec2() / cell - 0.5;
        xy.extend(p.z as f64)
    }
}

fn bilinear(samples: &[f32], stride: usize, gx: usize, gy: usize, dx: f64, dy: f64) -> f64 {
    let row0 = gy * stride + gx;
    let row1 = row0 + stride;
    let b0 = samples[row0] as f64 * (1.0 - dx) + samples[row0 + 1] as f64 * dx;
    let b1 = samples[row1] as f64 * (1.0 - dx) + samples[row1 + 1] as f64 * dx;
    b0 * (1.0 - dy) + b1 * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(width: u32, height: u32, h: f32) -> (GridGeometry, HeightfieldSnapshot) {
        let geometry =
            GridGeometry::new(UVec2::new(width, height), Vec2::ONE, -10.0, 10.0).unwrap();
        let snapshot = HeightfieldSnapshot::flat(&geometry, h);
        (geometry, snapshot)
    }

    #[test]
    fn test_flat_plane_vertical_segment_hits_midpoint() {
        let (geometry, snapshot) = flat(8, 8, 2.0);
        let lambda = TerrainIntersector::new(&geometry, &snapshot)
            .intersect_grid(DVec3::new(2.3, 3.6, 3.0), DVec3::new(2.3, 3.6, 1.0));
        assert!((lambda - 0.5).abs() < 1e-12, "got {lambda}");
    }

    #[test]
    fn test_flat_plane_segment_above_returns_one() {
        let (geometry, snapshot) = flat(8, 8, 2.0);
        let intersector = TerrainIntersector::new(&geometry, &snapshot);
        let lambda = intersector.intersect_grid(DVec3::new(1.0, 1.0, 3.0), DVec3::new(5.0, 4.0, 2.5));
        assert_eq!(lambda, 1.0);
    }

    #[test]
    fn test_segment_outside_grid_returns_one() {
        let (geometry, snapshot) = flat(8, 8, 2.0);
        let intersector = TerrainIntersector::new(&geometry, &snapshot);
        let lambda =
            intersector.intersect_grid(DVec3::new(-3.0, 2.0, 5.0), DVec3::new(-1.0, 2.0, -5.0));
        assert_eq!(lambda, 1.0);
        let lambda =
            intersector.intersect_grid(DVec3::new(2.0, 7.0, 5.0), DVec3::new(2.0, 9.0, -5.0));
        assert_eq!(lambda, 1.0);
    }

    #[test]
    fn test_ridge_in_middle_cell_is_first_crossing() {
        // Terrain samples are 5x3; column 3 rises to 2.0, everything else is 0.
        let geometry = GridGeometry::new(UVec2::new(6, 4), Vec2::ONE, -10.0, 10.0).unwrap();
        let mut snapshot = HeightfieldSnapshot::zeroed(&geometry);
        for row in 0..3 {
            snapshot.terrain[row * 5 + 3] = 2.0;
        }
        let lambda = intersect_grid(
            &snapshot.terrain,
            geometry.size(),
            DVec3::new(1.5, 0.5, 1.0),
            DVec3::new(3.5, 0.5, 1.0),
        );
        assert!((lambda - 0.5).abs() < 1e-12, "got {lambda}");
    }

    #[test]
    fn test_twisted_cell_uses_quadratic_root() {
        // One cell whose surface is z = x * y.
        let geometry = GridGeometry::new(UVec2::new(3, 3), Vec2::ONE, -10.0, 10.0).unwrap();
        let mut snapshot = HeightfieldSnapshot::zeroed(&geometry);
        snapshot.terrain[3] = 1.0;
        let lambda = intersect_grid(
            &snapshot.terrain,
            geometry.size(),
            DVec3::new(0.0, 0.0, 0.5),
            DVec3::new(1.0, 1.0, 0.5),
        );
        assert!((lambda - 0.5f64.sqrt()).abs() < 1e-9, "got {lambda}");
    }

    #[test]
    fn test_grid_without_cells_returns_one() {
        let (geometry, snapshot) = flat(2, 5, 0.0);
        let intersector = TerrainIntersector::new(&geometry, &snapshot);
        assert_eq!(
            intersector.intersect_grid(DVec3::new(0.0, 0.0, 1.0), DVec3::new(0.0, 0.0, -1.0)),
            1.0
        );
        assert_eq!(intersector.terrain_elevation(Vec2::ZERO), None);
    }

    #[test]
    fn test_world_space_line_uses_cell_size() {
        let geometry = GridGeometry::new(UVec2::new(8, 8), Vec2::splat(2.0), -10.0, 10.0).unwrap();
        let snapshot = HeightfieldSnapshot::flat(&geometry, 1.0);
        let intersector = TerrainIntersector::new(&geometry, &snapshot);
        let lambda = intersector.intersect_line(Vec3::new(6.0, 6.0, 5.0), Vec3::new(6.0, 6.0, -3.0));
        assert!((lambda - 0.5).abs() < 1e-6);
        // Beyond the last cell centre along x there is nothing to hit.
        let lambda =
            intersector.intersect_line(Vec3::new(15.5, 6.0, 5.0), Vec3::new(15.5, 6.0, -3.0));
        assert_eq!(lambda, 1.0);
    }

    #[test]
    fn test_terrain_elevation_interpolates_cell_centres() {
        let geometry = GridGeometry::new(UVec2::new(4, 4), Vec2::ONE, -10.0, 10.0).unwrap();
        let mut snapshot = HeightfieldSnapshot::zeroed(&geometry);
        // Terrain samples are 3x3; sample (1, 0) sits at world (1.5, 0.5).
        snapshot.terrain[1] = 4.0;
        let intersector = TerrainIntersector::new(&geometry, &snapshot);
        assert_eq!(intersector.terrain_elevation(Vec2::new(1.5, 0.5)), Some(4.0));
        assert_eq!(intersector.terrain_elevation(Vec2::new(1.0, 0.5)), Some(2.0));
        assert_eq!(intersector.terrain_elevation(Vec2::new(0.5, 0.5)), Some(0.0));
    }

    #[test]
    fn test_water_level_and_underwater() {
        let geometry = GridGeometry::new(UVec2::new(4, 4), Vec2::ONE, -10.0, 10.0).unwrap();
        let mut snapshot = HeightfieldSnapshot::flat(&geometry, 1.0);
        snapshot.water[4 + 1] = 3.0;
        let intersector = TerrainIntersector::new(&geometry, &snapshot);

        assert_eq!(intersector.water_level(Vec2::new(1.0, 1.0)), Some(3.0));
        assert_eq!(intersector.water_level(Vec2::new(1.5, 1.0)), Some(2.0));
        assert_eq!(intersector.water_level(Vec2::new(3.0, 1.0)), None);
        assert_eq!(intersector.water_level(Vec2::new(-0.1, 1.0)), None);

        assert!(intersector.is_underwater(Vec3::new(1.0, 1.0, 3.0)));
        assert!(!intersector.is_underwater(Vec3::new(1.0, 1.0, 3.5)));
        assert!(!intersector.is_underwater(Vec3::new(10.0, 1.0, -50.0)));
    }
}
