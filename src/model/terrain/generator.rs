use std::fmt;
use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::noise::{fbm, ridged_fbm};
use crate::model::galaxy::{BodySuperType, BodyType, SeededRandom, SystemBody};

/// Planet detail setting shared by every terrain body
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DetailLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl DetailLevel {
    /// Fractal octaves used by solid terrain
    pub fn octaves(&self) -> u32 {
        match self {
            DetailLevel::VeryLow => 5,
            DetailLevel::Low => 6,
            DetailLevel::Medium => 8,
            DetailLevel::High => 10,
            DetailLevel::VeryHigh => 12,
        }
    }

    /// Deepest quadtree level a patch may split to
    pub fn max_patch_depth(&self) -> u8 {
        match self {
            DetailLevel::VeryLow => 3,
            DetailLevel::Low => 4,
            DetailLevel::Medium => 6,
            DetailLevel::High => 8,
            DetailLevel::VeryHigh => 10,
        }
    }

    /// Vertices per patch edge
    pub fn patch_resolution(&self) -> u32 {
        match self {
            DetailLevel::VeryLow => 9,
            DetailLevel::Low => 11,
            DetailLevel::Medium => 17,
            DetailLevel::High => 25,
            DetailLevel::VeryHigh => 33,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainKind {
    GasGiant,
    Solid,
}

/// Height and shading of a terrain body, as a pure function of the body's
/// seed, class and the detail level it was built with.
///
/// Implementations are immutable and shared with patch workers.
pub trait TerrainHeightProvider: Send + Sync + fmt::Debug {
    /// Normalised offset from the base radius along `dir`, within
    /// `[-max_feature_height, max_feature_height]`
    fn get_height(&self, dir: DVec3) -> f64;

    /// Largest offset `get_height` can return, as a fraction of the radius
    fn max_feature_height(&self) -> f64;

    fn kind(&self) -> TerrainKind;

    fn detail(&self) -> DetailLevel;

    /// Vertex colour at `dir` for a given normalised height
    fn color(&self, dir: DVec3, height: f64) -> [f32; 4];
}

/// Build the generator for `sbody`. Gas giants get the flat variant,
/// everything else the fractal one.
pub fn generator_for(sbody: &SystemBody, detail: DetailLevel) -> Arc<dyn TerrainHeightProvider> {
    match sbody.super_type() {
        BodySuperType::GasGiant => Arc::new(GasGiantTerrain::new(sbody, detail)),
        _ => Arc::new(GeoSphereTerrain::new(sbody, detail)),
    }
}

/// Banded gas giant: shading only, no relief
#[derive(Debug, Clone)]
pub struct GasGiantTerrain {
    seed: u64,
    detail: DetailLevel,
    band_freq: f64,
    base_color: [f32; 3],
}

impl GasGiantTerrain {
    pub fn new(sbody: &SystemBody, detail: DetailLevel) -> Self {
        let mut rng = SeededRandom::new(sbody.seed);
        Self {
            seed: sbody.seed,
            detail,
            band_freq: rng.next_range(6.0, 14.0),
            base_color: [
                rng.next_range(0.5, 0.9) as f32,
                rng.next_range(0.4, 0.7) as f32,
                rng.next_range(0.2, 0.6) as f32,
            ],
        }
    }
}

impl TerrainHeightProvider for GasGiantTerrain {
    fn get_height(&self, _dir: DVec3) -> f64 {
        0.0
    }

    fn max_feature_height(&self) -> f64 {
        0.0
    }

    fn kind(&self) -> TerrainKind {
        TerrainKind::GasGiant
    }

    fn detail(&self) -> DetailLevel {
        self.detail
    }

    fn color(&self, dir: DVec3, _height: f64) -> [f32; 4] {
        let dir = dir.normalize_or_zero();
        // latitude bands, warped a little
        let warp = fbm(self.seed, dir, 3.0, 0.5, self.detail.octaves().min(6)) * 0.15;
        let band = ((dir.y + warp) * self.band_freq).sin() * 0.5 + 0.5;
        let shade = 0.75 + 0.25 * band as f32;
        [self.base_color[0] * shade, self.base_color[1] * shade, self.base_color[2] * shade, 1.0]
    }
}

/// Fractal height field for rocky planets, moons and asteroids
#[derive(Debug, Clone)]
pub struct GeoSphereTerrain {
    seed: u64,
    detail: DetailLevel,
    /// max feature height as a fraction of the radius
    feature_height: f64,
    continent_freq: f64,
    mountain_freq: f64,
    sea_level: f64,
}

impl GeoSphereTerrain {
    pub fn new(sbody: &SystemBody, detail: DetailLevel) -> Self {
        let mut rng = SeededRandom::new(sbody.seed);
        let feature_metres = match sbody.body_type {
            BodyType::Asteroid => sbody.radius * rng.next_range(0.1, 0.25),
            BodyType::Moon => rng.next_range(3000.0, 9000.0),
            _ => rng.next_range(4000.0, 12000.0),
        };
        let feature_height = if sbody.radius > 0.0 {
            (feature_metres / sbody.radius).min(0.5)
        } else {
            0.0
        };

        Self {
            seed: sbody.seed,
            detail,
            feature_height,
            continent_freq: rng.next_range(1.5, 3.0),
            mountain_freq: rng.next_range(6.0, 12.0),
            sea_level: rng.next_range(-0.3, 0.1),
        }
    }
}

impl TerrainHeightProvider for GeoSphereTerrain {
    fn get_height(&self, dir: DVec3) -> f64 {
        let dir = dir.normalize_or_zero();
        let octaves = self.detail.octaves();
        let continents = fbm(self.seed, dir, self.continent_freq, 0.5, octaves);
        let mountains = ridged_fbm(self.seed ^ 0xa5a5, dir, self.mountain_freq, 0.45, octaves) * 2.0 - 1.0;
        // mountains only rise on land
        let land = ((continents - self.sea_level) * 4.0).clamp(0.0, 1.0);
        let h = 0.6 * continents + 0.4 * mountains * land;
        h.clamp(-1.0, 1.0) * self.feature_height
    }

    fn max_feature_height(&self) -> f64 {
        self.feature_height
    }

    fn kind(&self) -> TerrainKind {
        TerrainKind::Solid
    }

    fn detail(&self) -> DetailLevel {
        self.detail
    }

    fn color(&self, dir: DVec3, height: f64) -> [f32; 4] {
        let rel = if self.feature_height > 0.0 { height / self.feature_height } else { 0.0 };
        let polar = dir.normalize_or_zero().y.abs();
        if polar > 0.9 || rel > 0.75 {
            [0.92, 0.94, 0.96, 1.0]
        } else if rel < self.sea_level * 0.6 {
            [0.35, 0.33, 0.30, 1.0]
        } else if rel < 0.3 {
            [0.40, 0.48, 0.28, 1.0]
        } else {
            [0.50, 0.45, 0.40, 1.0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::galaxy::Galaxy;
    use crate::model::system_path::SystemPath;

    fn body_of(kind: BodyType) -> SystemBody {
        let system = Galaxy::new(0).star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let mut body = system.bodies().iter().find(|b| b.is_terrain_body()).unwrap().clone();
        body.body_type = kind;
        body
    }

    fn directions() -> Vec<DVec3> {
        (0..200)
            .map(|i| {
                let t = i as f64 * 0.7;
                DVec3::new(t.sin() * (t * 0.3).cos(), (t * 0.3).sin(), t.cos() * (t * 0.3).cos()).normalize()
            })
            .collect()
    }

    #[test]
    fn test_height_is_idempotent() {
        let generator = generator_for(&body_of(BodyType::RockyPlanet), DetailLevel::High);
        for d in directions() {
            assert_eq!(generator.get_height(d).to_bits(), generator.get_height(d).to_bits());
        }
    }

    #[test]
    fn test_height_within_feature_bounds() {
        let generator = generator_for(&body_of(BodyType::Moon), DetailLevel::Medium);
        let eps = generator.max_feature_height();
        assert!(eps > 0.0);
        for d in directions() {
            let h = generator.get_height(d);
            assert!(h.abs() <= eps, "{} > {}", h, eps);
        }
    }

    #[test]
    fn test_gas_giant_is_flat() {
        let generator = generator_for(&body_of(BodyType::GasGiant), DetailLevel::VeryHigh);
        assert_eq!(generator.kind(), TerrainKind::GasGiant);
        assert_eq!(generator.max_feature_height(), 0.0);
        for d in directions() {
            assert_eq!(generator.get_height(d), 0.0);
        }
    }

    #[test]
    fn test_rebuilt_generator_matches() {
        let body = body_of(BodyType::RockyPlanet);
        let a = generator_for(&body, DetailLevel::Medium);
        let b = generator_for(&body, DetailLevel::Medium);
        for d in directions() {
            assert_eq!(a.get_height(d).to_bits(), b.get_height(d).to_bits());
        }
    }

    #[test]
    fn test_concurrent_queries_agree() {
        let generator = generator_for(&body_of(BodyType::RockyPlanet), DetailLevel::Medium);
        let expected: Vec<u64> = directions().iter().map(|d| generator.get_height(*d).to_bits()).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || directions().iter().map(|d| generator.get_height(*d).to_bits()).collect::<Vec<_>>())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }
}
