// patch.rs - cube-sphere quadtree of terrain patches
//
// Each of the six cube faces is a quadtree. Leaves are chosen from the camera
// distance, missing meshes are handed out as build requests (a bounded number
// per update, like a compute budget), and finished meshes are merged back on
// the main thread. Vertices are placed on one integer grid per face so that
// neighbouring patches of the same depth share their edge vertices exactly;
// skirts hide the cracks between different depths.

use std::collections::{HashMap, HashSet};
use std::f64::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::DVec3;

use super::generator::{DetailLevel, TerrainHeightProvider};
use crate::jobs::CancelToken;
use crate::utils::{Mesh, Vertex};

pub const FACE_COUNT: u8 = 6;

/// Split a patch when the camera is closer than this many patch arcs
const SPLIT_FACTOR: f64 = 3.0;

/// Skirt depth as a fraction of the patch arc length
const SKIRT_FRACTION: f64 = 0.02;

// generations are unique across every tree in the process, so a result can
// never be mistaken for one of a tree that replaced its owner
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Address of a patch: cube face, quadtree depth and cell at that depth
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchKey {
    pub face: u8,
    pub depth: u8,
    pub x: u32,
    pub y: u32,
}

impl PatchKey {
    pub fn root(face: u8) -> Self {
        Self { face, depth: 0, x: 0, y: 0 }
    }

    pub fn children(&self) -> [PatchKey; 4] {
        let (x, y, depth) = (self.x * 2, self.y * 2, self.depth + 1);
        [
            PatchKey { face: self.face, depth, x, y },
            PatchKey { face: self.face, depth, x: x + 1, y },
            PatchKey { face: self.face, depth, x, y: y + 1 },
            PatchKey { face: self.face, depth, x: x + 1, y: y + 1 },
        ]
    }

    pub fn parent(&self) -> Option<PatchKey> {
        if self.depth == 0 {
            return None;
        }
        Some(PatchKey { face: self.face, depth: self.depth - 1, x: self.x / 2, y: self.y / 2 })
    }

    /// Angular size of the patch edge (radians, approximate)
    pub fn arc(&self) -> f64 {
        FRAC_PI_2 / (1u64 << self.depth) as f64
    }

    /// Unit direction through the middle of the patch
    pub fn center_dir(&self) -> DVec3 {
        let cells = (1u64 << self.depth) as f64;
        let u = -1.0 + 2.0 * (self.x as f64 + 0.5) / cells;
        let v = -1.0 + 2.0 * (self.y as f64 + 0.5) / cells;
        cube_to_dir(self.face, u, v)
    }

    /// Direction of grid vertex (i, j) for a patch with `resolution` vertices per edge
    pub fn grid_dir(&self, i: u32, j: u32, resolution: u32) -> DVec3 {
        let segments = (resolution - 1) as u64;
        let total = (segments << self.depth) as f64;
        let gi = self.x as u64 * segments + i as u64;
        let gj = self.y as u64 * segments + j as u64;
        cube_to_dir(self.face, -1.0 + 2.0 * gi as f64 / total, -1.0 + 2.0 * gj as f64 / total)
    }
}

/// Map face coordinates (u, v in [-1, 1]) to a unit direction
fn cube_to_dir(face: u8, u: f64, v: f64) -> DVec3 {
    let p = match face {
        0 => DVec3::new(1.0, v, -u),
        1 => DVec3::new(-1.0, v, u),
        2 => DVec3::new(u, 1.0, -v),
        3 => DVec3::new(u, -1.0, v),
        4 => DVec3::new(u, v, 1.0),
        _ => DVec3::new(-u, v, -1.0),
    };
    p.normalize()
}

/// Finished patch geometry. Vertices are relative to `center` so they stay
/// precise in f32 at planetary scale.
#[derive(Debug, Clone)]
pub struct PatchMesh {
    pub key: PatchKey,
    pub generation: u64,
    /// body-local position of the patch origin (metres)
    pub center: DVec3,
    pub bounding_radius: f64,
    pub mesh: Mesh,
}

/// Everything a worker needs to build one patch. Only immutable inputs.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    pub key: PatchKey,
    pub generation: u64,
    pub radius: f64,
    pub resolution: u32,
    pub generator: Arc<dyn TerrainHeightProvider>,
}

impl PatchRequest {
    /// Build the mesh. Returns `None` if cancelled part way through.
    pub fn build(self, token: &CancelToken) -> Option<PatchMesh> {
        build_patch(&self, token)
    }
}

fn build_patch(req: &PatchRequest, token: &CancelToken) -> Option<PatchMesh> {
    let n = req.resolution.max(2);
    let center = req.key.center_dir() * req.radius;

    let mut positions = Vec::with_capacity((n * n) as usize);
    let mut dirs = Vec::with_capacity((n * n) as usize);
    let mut heights = Vec::with_capacity((n * n) as usize);
    for j in 0..n {
        if token.is_cancelled() {
            return None;
        }
        for i in 0..n {
            let dir = req.key.grid_dir(i, j, n);
            let h = req.generator.get_height(dir);
            positions.push(dir * req.radius * (1.0 + h));
            dirs.push(dir);
            heights.push(h);
        }
    }

    let at = |i: u32, j: u32| (j * n + i) as usize;
    let mut vertices = Vec::with_capacity((n * n + 4 * n) as usize);
    let mut bounding_radius: f64 = 0.0;
    for j in 0..n {
        for i in 0..n {
            let idx = at(i, j);
            let du = positions[at((i + 1).min(n - 1), j)] - positions[at(i.saturating_sub(1), j)];
            let dv = positions[at(i, (j + 1).min(n - 1))] - positions[at(i, j.saturating_sub(1))];
            let mut normal = du.cross(dv).normalize_or_zero();
            if normal.dot(dirs[idx]) < 0.0 {
                normal = -normal;
            }
            if normal == DVec3::ZERO {
                normal = dirs[idx];
            }

            let rel = positions[idx] - center;
            bounding_radius = bounding_radius.max(rel.length());
            vertices.push(Vertex {
                pos: rel.as_vec3().to_array(),
                normal: normal.as_vec3().to_array(),
                color: req.generator.color(dirs[idx], heights[idx]),
                uv: [i as f32 / (n - 1) as f32, j as f32 / (n - 1) as f32],
            });
        }
    }

    let mut indices = Vec::with_capacity(((n - 1) * (n - 1) * 6 + (n - 1) * 24) as usize);
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let a = at(i, j) as u32;
            let b = at(i + 1, j) as u32;
            let c = at(i, j + 1) as u32;
            let d = at(i + 1, j + 1) as u32;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    if token.is_cancelled() {
        return None;
    }

    // skirts: walk the perimeter and hang a strip below each edge
    let skirt_depth = req.radius * req.key.arc() * SKIRT_FRACTION;
    let mut perimeter = Vec::with_capacity((4 * (n - 1)) as usize);
    perimeter.extend((0..n - 1).map(|i| at(i, 0)));
    perimeter.extend((0..n - 1).map(|j| at(n - 1, j)));
    perimeter.extend((1..n).rev().map(|i| at(i, n - 1)));
    perimeter.extend((1..n).rev().map(|j| at(0, j)));

    let skirt_base = vertices.len() as u32;
    for &idx in &perimeter {
        let top = vertices[idx];
        let lowered = positions[idx] - dirs[idx] * skirt_depth - center;
        vertices.push(Vertex { pos: lowered.as_vec3().to_array(), ..top });
    }
    let count = perimeter.len() as u32;
    for k in 0..count {
        let next = (k + 1) % count;
        let a = perimeter[k as usize] as u32;
        let b = perimeter[next as usize] as u32;
        let sa = skirt_base + k;
        let sb = skirt_base + next;
        indices.extend_from_slice(&[a, b, sa, b, sb, sa]);
    }

    Some(PatchMesh {
        key: req.key,
        generation: req.generation,
        center,
        bounding_radius: bounding_radius + skirt_depth,
        mesh: Mesh { vertices, indices },
    })
}

/// Per-body patch state: ready meshes, outstanding requests and the leaves
/// the camera currently wants.
#[derive(Debug)]
pub struct PatchTree {
    generation: u64,
    ready: HashMap<PatchKey, Arc<PatchMesh>>,
    pending: HashSet<PatchKey>,
    desired: Vec<PatchKey>,
}

impl Default for PatchTree {
    fn default() -> Self {
        Self {
            generation: next_generation(),
            ready: HashMap::new(),
            pending: HashSet::new(),
            desired: Vec::new(),
        }
    }
}

impl PatchTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn desired_leaves(&self) -> &[PatchKey] {
        &self.desired
    }

    /// Drop every standing patch and start a new generation. Results still
    /// in flight for the old generation are ignored on merge.
    pub fn reset(&mut self) {
        self.generation = next_generation();
        self.ready.clear();
        self.pending.clear();
        self.desired.clear();
    }

    /// Pick leaves for a camera at `camera_local` (body-local metres) and
    /// hand out at most `budget` build requests, nearest first.
    pub fn update(
        &mut self,
        camera_local: DVec3,
        radius: f64,
        detail: DetailLevel,
        generator: &Arc<dyn TerrainHeightProvider>,
        budget: usize,
    ) -> Vec<PatchRequest> {
        if radius <= 0.0 {
            return Vec::new();
        }
        let camera = camera_local / radius;
        let max_depth = detail.max_patch_depth();

        let mut leaves = Vec::new();
        for face in 0..FACE_COUNT {
            select_leaves(PatchKey::root(face), camera, max_depth, &mut leaves);
        }
        leaves.sort_by(|a, b| {
            let da = (camera - a.center_dir()).length_squared();
            let db = (camera - b.center_dir()).length_squared();
            da.total_cmp(&db)
        });
        self.desired = leaves;

        // roots first so every face has something to fall back to
        let mut requests = Vec::new();
        let roots = (0..FACE_COUNT).map(PatchKey::root);
        for key in roots.chain(self.desired.iter().copied()) {
            if requests.len() >= budget {
                break;
            }
            if self.ready.contains_key(&key) || !self.pending.insert(key) {
                continue;
            }
            requests.push(PatchRequest {
                key,
                generation: self.generation,
                radius,
                resolution: detail.patch_resolution(),
                generator: Arc::clone(generator),
            });
        }

        self.evict();
        requests
    }

    /// Accept a finished patch. Returns false if it was not requested by
    /// this tree's current generation.
    pub fn merge(&mut self, patch: PatchMesh) -> bool {
        if patch.generation != self.generation {
            tracing::trace!(key = ?patch.key, generation = patch.generation, "dropping stale patch");
            return false;
        }
        if !self.pending.remove(&patch.key) {
            tracing::trace!(key = ?patch.key, "dropping unrequested patch");
            return false;
        }
        self.ready.insert(patch.key, Arc::new(patch));
        true
    }

    /// Forget an outstanding request so it can be issued again
    pub fn abandon(&mut self, key: &PatchKey) {
        self.pending.remove(key);
    }

    /// Meshes to draw: each desired leaf if ready, otherwise its nearest
    /// ready ancestor, otherwise its ready children.
    pub fn visible_patches(&self) -> Vec<Arc<PatchMesh>> {
        let mut chosen: Vec<PatchKey> = Vec::new();
        let mut seen = HashSet::new();
        for leaf in &self.desired {
            if self.ready.contains_key(leaf) {
                if seen.insert(*leaf) {
                    chosen.push(*leaf);
                }
                continue;
            }
            let mut ancestor = leaf.parent();
            let mut found = false;
            while let Some(key) = ancestor {
                if self.ready.contains_key(&key) {
                    if seen.insert(key) {
                        chosen.push(key);
                    }
                    found = true;
                    break;
                }
                ancestor = key.parent();
            }
            if !found {
                let children = leaf.children();
                if children.iter().all(|c| self.ready.contains_key(c)) {
                    for child in children {
                        if seen.insert(child) {
                            chosen.push(child);
                        }
                    }
                }
            }
        }
        chosen.iter().filter_map(|key| self.ready.get(key).cloned()).collect()
    }

    /// Keep desired leaves, their ancestors and children, and the roots
    fn evict(&mut self) {
        let desired: HashSet<PatchKey> = self.desired.iter().copied().collect();
        let mut keep = desired.clone();
        for leaf in &self.desired {
            let mut ancestor = leaf.parent();
            while let Some(key) = ancestor {
                if !keep.insert(key) {
                    break;
                }
                ancestor = key.parent();
            }
        }
        let before = self.ready.len();
        self.ready.retain(|key, _| {
            key.depth == 0 || keep.contains(key) || key.parent().is_some_and(|p| desired.contains(&p))
        });
        let evicted = before - self.ready.len();
        if evicted > 0 {
            tracing::trace!(evicted, "evicted terrain patches");
        }
    }
}

fn select_leaves(key: PatchKey, camera: DVec3, max_depth: u8, out: &mut Vec<PatchKey>) {
    let distance = (camera - key.center_dir()).length();
    if key.depth < max_depth && distance < key.arc() * SPLIT_FACTOR {
        for child in key.children() {
            select_leaves(child, camera, max_depth, out);
        }
    } else {
        out.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::galaxy::Galaxy;
    use crate::model::system_path::SystemPath;
    use crate::model::terrain::generator::generator_for;

    const RADIUS: f64 = 1.0e6;

    fn generator(detail: DetailLevel) -> Arc<dyn TerrainHeightProvider> {
        let system = Galaxy::new(0).star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let body = system.bodies().iter().find(|b| b.is_terrain_body()).unwrap();
        generator_for(body, detail)
    }

    fn complete(tree: &mut PatchTree, requests: Vec<PatchRequest>) {
        let token = CancelToken::new();
        for req in requests {
            let patch = req.build(&token).unwrap();
            assert!(tree.merge(patch));
        }
    }

    #[test]
    fn test_far_camera_selects_roots() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::Medium);
        tree.update(DVec3::new(0.0, 0.0, 100.0 * RADIUS), RADIUS, DetailLevel::Medium, &generator, 0);
        assert_eq!(tree.desired_leaves().len(), FACE_COUNT as usize);
        assert!(tree.desired_leaves().iter().all(|k| k.depth == 0));
    }

    #[test]
    fn test_near_camera_splits_to_max_depth() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::Low);
        let camera = DVec3::new(0.1, 0.2, 1.0).normalize() * RADIUS * 1.0001;
        tree.update(camera, RADIUS, DetailLevel::Low, &generator, 0);
        let deepest = tree.desired_leaves().iter().map(|k| k.depth).max().unwrap();
        assert_eq!(deepest, DetailLevel::Low.max_patch_depth());
        // nearest leaf comes first
        assert_eq!(tree.desired_leaves()[0].depth, deepest);
    }

    #[test]
    fn test_budget_and_pending_dedupe() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::VeryLow);
        let camera = DVec3::new(0.0, 0.0, RADIUS * 1.01);

        let first = tree.update(camera, RADIUS, DetailLevel::VeryLow, &generator, 4);
        assert_eq!(first.len(), 4);
        assert_eq!(tree.pending_count(), 4);

        let second = tree.update(camera, RADIUS, DetailLevel::VeryLow, &generator, 4);
        assert_eq!(second.len(), 4);
        let firsts: HashSet<_> = first.iter().map(|r| r.key).collect();
        assert!(second.iter().all(|r| !firsts.contains(&r.key)));
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::VeryLow);
        let requests = tree.update(DVec3::new(0.0, 0.0, 10.0 * RADIUS), RADIUS, DetailLevel::VeryLow, &generator, 6);
        tree.reset();

        let token = CancelToken::new();
        for req in requests {
            assert!(!tree.merge(req.build(&token).unwrap()));
        }
        assert_eq!(tree.ready_count(), 0);
    }

    #[test]
    fn test_other_tree_patches_are_dropped() {
        let generator = generator(DetailLevel::VeryLow);
        let camera = DVec3::new(0.0, 0.0, 10.0 * RADIUS);
        let mut old = PatchTree::new();
        let requests = old.update(camera, RADIUS, DetailLevel::VeryLow, &generator, 6);

        // same keys requested by a fresh tree in its first generation
        let mut fresh = PatchTree::new();
        let wanted = fresh.update(camera, RADIUS, DetailLevel::VeryLow, &generator, 6);
        assert_eq!(wanted.len(), requests.len());
        assert_ne!(old.generation(), fresh.generation());

        let token = CancelToken::new();
        for req in requests {
            assert!(!fresh.merge(req.build(&token).unwrap()));
        }
        assert_eq!(fresh.ready_count(), 0);
        assert_eq!(fresh.pending_count(), wanted.len());
    }

    #[test]
    fn test_unrequested_patch_is_dropped() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::VeryLow);
        let requests = tree.update(DVec3::new(0.0, 0.0, 10.0 * RADIUS), RADIUS, DetailLevel::VeryLow, &generator, 1);
        let key = requests[0].key;
        let stray = PatchRequest {
            key: PatchKey { face: (key.face + 1) % FACE_COUNT, ..key },
            generation: tree.generation(),
            radius: RADIUS,
            resolution: 9,
            generator: Arc::clone(&generator),
        };
        let token = CancelToken::new();
        assert!(!tree.merge(stray.build(&token).unwrap()));
        complete(&mut tree, requests);
        assert_eq!(tree.ready_count(), 1);
    }

    #[test]
    fn test_visible_falls_back_to_ancestor() {
        let mut tree = PatchTree::new();
        let generator = generator(DetailLevel::VeryLow);

        let far = DVec3::new(0.0, 0.0, 100.0 * RADIUS);
        let roots = tree.update(far, RADIUS, DetailLevel::VeryLow, &generator, 6);
        complete(&mut tree, roots);

        let near = DVec3::new(0.0, 0.0, RADIUS * 1.001);
        let _ = tree.update(near, RADIUS, DetailLevel::VeryLow, &generator, 0);
        assert!(tree.desired_leaves().iter().any(|k| k.depth > 0));

        let visible = tree.visible_patches();
        assert_eq!(visible.len(), FACE_COUNT as usize);
        assert!(visible.iter().all(|p| p.key.depth == 0));
    }

    #[test]
    fn test_shared_edges_match_exactly() {
        let res = DetailLevel::Medium.patch_resolution();
        let left = PatchKey { face: 4, depth: 2, x: 1, y: 2 };
        let right = PatchKey { face: 4, depth: 2, x: 2, y: 2 };
        for j in 0..res {
            assert_eq!(left.grid_dir(res - 1, j, res), right.grid_dir(0, j, res));
        }

        // +X face u = 1 meets -Z face u = -1
        let px = PatchKey::root(0);
        let nz = PatchKey::root(5);
        for j in 0..res {
            assert_eq!(px.grid_dir(res - 1, j, res), nz.grid_dir(0, j, res));
        }
    }

    #[test]
    fn test_patch_vertices_stay_near_surface() {
        let generator = generator(DetailLevel::Medium);
        let mfh = generator.max_feature_height();
        let key = PatchKey { face: 2, depth: 3, x: 5, y: 1 };
        let req = PatchRequest { key, generation: 0, radius: RADIUS, resolution: 9, generator };
        let patch = req.build(&CancelToken::new()).unwrap();

        let skirt = RADIUS * key.arc() * SKIRT_FRACTION;
        for v in &patch.mesh.vertices {
            let r = (patch.center + DVec3::from(v.pos.map(|c| c as f64))).length();
            assert!(r <= RADIUS * (1.0 + mfh) + 1.0);
            assert!(r >= RADIUS * (1.0 - mfh) - skirt - 1.0);
        }
        assert_eq!(patch.mesh.indices.len() % 3, 0);
        assert!(patch.mesh.indices.iter().all(|&i| (i as usize) < patch.mesh.vertices.len()));
    }

    #[test]
    fn test_cancelled_build_returns_none() {
        let token = CancelToken::new();
        token.cancel();
        let req = PatchRequest {
            key: PatchKey::root(0),
            generation: 0,
            radius: RADIUS,
            resolution: 9,
            generator: generator(DetailLevel::VeryLow),
        };
        assert!(req.build(&token).is_none());
    }

    #[test]
    fn test_children_parent() {
        let key = PatchKey { face: 3, depth: 4, x: 7, y: 9 };
        for child in key.children() {
            assert_eq!(child.parent(), Some(key));
        }
        assert_eq!(PatchKey::root(1).parent(), None);
    }
}
