use crate::geometry::GridGeometry;

/// One complete pair of terrain and water height arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightfieldSnapshot {
    /// Cell-centred terrain heights, `(W-1) x (H-1)` row-major.
    pub terrain: Vec<f32>,
    /// Vertex-centred water surface heights, `W x H` row-major.
    pub water: Vec<f32>,
}

impl HeightfieldSnapshot {
    /// A snapshot sized for `geometry`, with every sample at `elevation`.
    pub fn flat(geometry: &GridGeometry, elevation: f32) -> Self {
        Self {
            terrain: vec![elevation; geometry.terrain_len()],
            water: vec![elevation; geometry.water_len()],
        }
    }

    /// A zero-filled snapshot sized for `geometry`.
    pub fn zeroed(geometry: &GridGeometry) -> Self {
        Self::flat(geometry, 0.0)
    }

    /// Whether both layers have the lengths `geometry` implies.
    pub fn matches(&self, geometry: &GridGeometry) -> bool {
        self.terrain.len() == geometry.terrain_len() && self.water.len() == geometry.water_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec2, Vec2};

    #[test]
    fn test_flat_snapshot_matches_geometry() {
        let geometry = GridGeometry::new(UVec2::new(5, 3), Vec2::ONE, -1.0, 1.0).unwrap();
        let snapshot = HeightfieldSnapshot::flat(&geometry, 0.25);
        assert!(snapshot.matches(&geometry));
        assert_eq!(snapshot.terrain.len(), 8);
        assert_eq!(snapshot.water.len(), 15);
        assert!(snapshot.water.iter().all(|h| *h == 0.25));
    }

    #[test]
    fn test_mismatched_lengths_are_detected() {
        let geometry = GridGeometry::new(UVec2::new(5, 3), Vec2::ONE, -1.0, 1.0).unwrap();
        let mut snapshot = HeightfieldSnapshot::zeroed(&geometry);
        snapshot.water.pop();
        assert!(!snapshot.matches(&geometry));
    }
}
