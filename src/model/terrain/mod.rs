pub mod generator;
pub mod noise;
pub mod patch;

use std::sync::Arc;

use glam::DVec3;

pub use generator::{generator_for, DetailLevel, GasGiantTerrain, GeoSphereTerrain, TerrainHeightProvider, TerrainKind};
pub use patch::{PatchKey, PatchMesh, PatchRequest, PatchTree};

use crate::model::galaxy::SystemBody;

/// A celestial body with procedural terrain.
///
/// Only `sbody_index` is persisted. The generator is re-derived from the
/// `SystemBody` descriptor on load, so it reconstructs identically.
#[derive(Debug)]
pub struct TerrainBody {
    sbody_index: u32,
    radius: f64,
    mass: f64,
    generator: Option<Arc<dyn TerrainHeightProvider>>,
    /// absolute radius of the highest possible feature (metres)
    max_feature_radius: f64,
    patches: PatchTree,
}

impl TerrainBody {
    pub fn new(sbody: &SystemBody, detail: DetailLevel) -> Self {
        let mut body = Self::uninit(sbody.index);
        body.init(sbody, detail);
        body
    }

    /// Placeholder used while loading, before the descriptor is resolved
    pub fn uninit(sbody_index: u32) -> Self {
        Self {
            sbody_index,
            radius: 0.0,
            mass: 0.0,
            generator: None,
            max_feature_radius: 0.0,
            patches: PatchTree::new(),
        }
    }

    pub fn init(&mut self, sbody: &SystemBody, detail: DetailLevel) {
        self.sbody_index = sbody.index;
        self.radius = sbody.radius;
        self.mass = sbody.mass;
        let generator = generator_for(sbody, detail);
        self.max_feature_radius = (generator.max_feature_height() + 1.0) * sbody.radius;
        self.generator = Some(generator);
        self.patches.reset();
        tracing::debug!(sbody = sbody.index, name = %sbody.name, ?detail, "initialised terrain body");
    }

    pub fn sbody_index(&self) -> u32 {
        self.sbody_index
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn is_initialized(&self) -> bool {
        self.generator.is_some()
    }

    pub fn generator(&self) -> Option<&Arc<dyn TerrainHeightProvider>> {
        self.generator.as_ref()
    }

    pub fn max_feature_radius(&self) -> f64 {
        self.max_feature_radius
    }

    /// Distance from the body centre to the surface below `pos` (body-local)
    pub fn get_terrain_height(&self, pos: DVec3) -> f64 {
        let Some(generator) = &self.generator else {
            tracing::error!(sbody = self.sbody_index, "terrain height queried before the generator exists");
            return self.radius;
        };
        let dir = pos.normalize_or_zero();
        if dir == DVec3::ZERO {
            return self.radius;
        }
        self.radius * (1.0 + generator.get_height(dir))
    }

    /// Rebuild the generator for a new detail setting and throw away every
    /// standing patch so detail levels never mix on one body.
    pub fn on_change_detail_level(&mut self, sbody: &SystemBody, detail: DetailLevel) {
        if sbody.index != self.sbody_index {
            tracing::error!(expected = self.sbody_index, got = sbody.index, "detail change for the wrong system body");
            return;
        }
        self.init(sbody, detail);
    }

    /// Refresh LOD for a camera at `camera_local` (body-local metres)
    pub fn update_lod(&mut self, camera_local: DVec3, budget: usize) -> Vec<PatchRequest> {
        let Some(generator) = &self.generator else {
            return Vec::new();
        };
        let detail = generator.detail();
        self.patches.update(camera_local, self.radius, detail, generator, budget)
    }

    pub fn merge_patch(&mut self, patch: PatchMesh) -> bool {
        self.patches.merge(patch)
    }

    pub fn abandon_patch(&mut self, key: &PatchKey) {
        self.patches.abandon(key);
    }

    pub fn patches(&self) -> &PatchTree {
        &self.patches
    }

    pub fn visible_patches(&self) -> Vec<Arc<PatchMesh>> {
        self.patches.visible_patches()
    }
}
