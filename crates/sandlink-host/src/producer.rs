//! Synthetic heightfield producer for the demo host.
//!
//! Terrain is multi-octave fBm over simplex noise; the water surface is a
//! flat level with travelling ripples on top.

use noise::{NoiseFn, Simplex};
use sandlink_terrain::{GridGeometry, HeightfieldSnapshot};

/// fBm parameters for the terrain layer.
#[derive(Clone, Debug)]
pub struct TerrainParams {
    pub seed: u32,
    pub octaves: u32,
    /// Frequency multiplier between successive octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between successive octaves.
    pub persistence: f64,
    /// Cycles per world unit of the first octave.
    pub base_frequency: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 7,
            octaves: 5,
            lacunarity: 2.0,
            persistence: 0.5,
            base_frequency: 0.02,
        }
    }
}

/// Fills snapshots for one fixed geometry.
pub struct SyntheticTerrain {
    noise: Simplex,
    params: TerrainParams,
    geometry: GridGeometry,
    /// Elevation range the producer writes into, before the safety margin.
    domain: (f32, f32),
}

impl SyntheticTerrain {
    pub fn new(geometry: GridGeometry, domain: (f32, f32), params: TerrainParams) -> Self {
        Self {
            noise: Simplex::new(params.seed),
            params,
            geometry,
            domain,
        }
    }

    /// fBm sum normalized to roughly `[-1, 1]`.
    fn fbm(&self, x: f64, y: f64) -> f64 {
        let mut frequency = self.params.base_frequency;
        let mut amplitude = 1.0;
        let mut total = 0.0;
        let mut norm = 0.0;

        for _ in 0..self.params.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            norm += amplitude;
            frequency *= self.params.lacunarity;
            amplitude *= self.params.persistence;
        }

        if norm > 0.0 { total / norm } else { 0.0 }
    }

    /// Resting water level, a third of the way up the domain.
    pub fn sea_level(&self) -> f32 {
        let (min, max) = self.domain;
        min + (max - min) / 3.0
    }

    /// Overwrite every sample of `snapshot` with the heightfield at `time`.
    pub fn fill(&self, snapshot: &mut HeightfieldSnapshot, time: f64) {
        let size = self.geometry.size();
        let cell = self.geometry.cell_size().as_dvec2();
        let (min, max) = self.domain;
        let half_range = f64::from(max - min) * 0.5;
        let mid = f64::from(min) + half_range;

        snapshot.terrain.clear();
        for y in 0..size.y - 1 {
            for x in 0..size.x - 1 {
                // Terrain samples sit at cell centres.
                let wx = (f64::from(x) + 0.5) * cell.x;
                let wy = (f64::from(y) + 0.5) * cell.y;
                let h = mid + self.fbm(wx, wy) * half_range;
                snapshot.terrain.push(h.clamp(f64::from(min), f64::from(max)) as f32);
            }
        }

        let sea = f64::from(self.sea_level());
        let amplitude = half_range * 0.02;
        snapshot.water.clear();
        for y in 0..size.y {
            for x in 0..size.x {
                let wx = f64::from(x) * cell.x;
                let wy = f64::from(y) * cell.y;
                let ripple = (wx * 0.3 + time * 1.5).sin() * (wy * 0.2 - time).cos();
                let h = sea + ripple * amplitude;
                snapshot.water.push(h.clamp(f64::from(min), f64::from(max)) as f32);
            }
        }
    }
}
