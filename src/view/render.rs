//! Walks the bodies of a space and hands them to a render backend.
//!
//! The backend only sees camera-relative, interpolated transforms. Nothing
//! here touches physics state: positions come from the last
//! `Space::update_interp`.

use std::sync::Arc;

use glam::{DMat3, DVec3};

use super::camera::Camera;
use crate::model::body::{Body, BodyId, BodyKind};
use crate::model::game::Game;
use crate::model::space::Space;
use crate::model::terrain::PatchMesh;

/// Shadows computed per terrain body
pub const MAX_SHADOWS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    Star,
    Terrain,
    Starport,
    Ship,
}

impl DrawKind {
    fn of(body: &Body) -> Self {
        match body.kind {
            BodyKind::Star => DrawKind::Star,
            BodyKind::Terrain(_) => DrawKind::Terrain,
            BodyKind::Starport { .. } => DrawKind::Starport,
            BodyKind::Ship(_) => DrawKind::Ship,
        }
    }
}

/// A body between a terrain body and the star
#[derive(Clone, Debug, PartialEq)]
pub struct Shadow {
    pub occluder: BodyId,
    /// Occluder centre relative to the shadowed body's centre
    pub centre: DVec3,
    pub radius: f64,
    /// 0 = no occlusion, 1 = the whole disc is covered
    pub strength: f64,
}

/// One draw call's worth of body
#[derive(Clone, Debug)]
pub struct DrawBody {
    pub id: BodyId,
    pub label: String,
    pub kind: DrawKind,
    /// Interpolated position relative to the camera
    pub position: DVec3,
    pub orient: DMat3,
    pub radius: f64,
    pub distance: f64,
    pub shadows: Vec<Shadow>,
    pub patches: Vec<Arc<PatchMesh>>,
}

/// Render backend boundary
pub trait Renderer {
    fn begin_frame(&mut self, camera: &Camera);
    fn draw_body(&mut self, body: &DrawBody);
    fn end_frame(&mut self);
    fn present(&mut self);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: usize,
    pub bodies_drawn: usize,
    pub bodies_culled: usize,
    pub patches_drawn: usize,
}

impl std::ops::AddAssign for RenderStats {
    fn add_assign(&mut self, other: Self) {
        self.draw_calls += other.draw_calls;
        self.bodies_drawn += other.bodies_drawn;
        self.bodies_culled += other.bodies_culled;
        self.patches_drawn += other.patches_drawn;
    }
}

pub struct RenderOrchestrator {
    camera: Camera,
    follow_player: bool,
}

impl RenderOrchestrator {
    pub fn new(camera: Camera) -> Self {
        Self { camera, follow_player: true }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// When set, the camera sits at the player's interpolated position each frame
    pub fn set_follow_player(&mut self, follow: bool) {
        self.follow_player = follow;
    }

    /// Move the camera to the player, if there is one
    pub fn update_camera(&mut self, game: &Game) {
        if !self.follow_player {
            return;
        }
        if let Some(player) = game.player().and_then(|id| game.space().body(id)) {
            self.camera.position = player.interp_pos();
            self.camera.orient = player.interp_orient();
        }
    }

    /// Draw one frame of `game`
    pub fn render<R: Renderer + ?Sized>(&mut self, game: &Game, renderer: &mut R) -> RenderStats {
        self.update_camera(game);
        let space = game.space();
        let player = if self.follow_player { game.player() } else { None };
        let star = space
            .bodies()
            .find(|(_, b)| matches!(b.kind, BodyKind::Star))
            .map(|(_, b)| b.interp_pos());

        let mut stats = RenderStats::default();
        let mut draws = Vec::new();
        for (id, body) in space.bodies() {
            // the player is the viewpoint
            if Some(id) == player {
                continue;
            }
            let position = self.camera.relative(body.interp_pos());
            let radius = body.clip_radius();
            if !self.camera.is_sphere_in_frustum(position, radius) {
                stats.bodies_culled += 1;
                continue;
            }

            let (shadows, patches) = match (body.terrain(), star) {
                (Some(terrain), Some(star)) => (principal_shadows(space, id, star, MAX_SHADOWS), terrain.visible_patches()),
                (Some(terrain), None) => (Vec::new(), terrain.visible_patches()),
                _ => (Vec::new(), Vec::new()),
            };

            draws.push(DrawBody {
                id,
                label: body.label.clone(),
                kind: DrawKind::of(body),
                position,
                orient: body.interp_orient(),
                radius,
                distance: position.length(),
                shadows,
                patches,
            });
        }

        // back to front
        draws.sort_by(|a, b| b.distance.total_cmp(&a.distance));

        renderer.begin_frame(&self.camera);
        for draw in &draws {
            renderer.draw_body(draw);
            stats.bodies_drawn += 1;
            stats.patches_drawn += draw.patches.len();
            stats.draw_calls += draw.patches.len().max(1);
        }
        renderer.end_frame();
        renderer.present();
        stats
    }
}

/// Up to `max` bodies lying between `body` and the star at `star_pos` whose
/// discs overlap `body` as seen from the star, strongest first
pub fn principal_shadows(space: &Space, body: BodyId, star_pos: DVec3, max: usize) -> Vec<Shadow> {
    let Some(lit) = space.body(body) else { return Vec::new() };
    let lit_pos = lit.interp_pos();
    let to_star = star_pos - lit_pos;
    let star_dist = to_star.length();
    if star_dist <= 0.0 {
        return Vec::new();
    }
    let dir = to_star / star_dist;

    let mut shadows: Vec<Shadow> = space
        .bodies()
        .filter(|(id, b)| *id != body && b.terrain().is_some())
        .filter_map(|(id, occluder)| {
            let offset = occluder.interp_pos() - lit_pos;
            let along = offset.dot(dir);
            if along <= 0.0 || along >= star_dist {
                return None;
            }
            let perp = (offset - dir * along).length();
            let reach = occluder.radius + lit.radius;
            if perp >= reach {
                return None;
            }
            let coverage = (occluder.radius / lit.radius.max(f64::EPSILON)).min(1.0);
            Some(Shadow {
                occluder: id,
                centre: offset,
                radius: occluder.radius,
                strength: coverage * (1.0 - perp / reach),
            })
        })
        .collect();

    shadows.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    shadows.truncate(max);
    shadows
}

/// Logs what it is asked to draw. Used by the headless binary.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    frame: u64,
}

impl Renderer for TracingRenderer {
    fn begin_frame(&mut self, camera: &Camera) {
        self.frame += 1;
        tracing::trace!(frame = self.frame, position = ?camera.position, "begin frame");
    }

    fn draw_body(&mut self, body: &DrawBody) {
        tracing::trace!(
            label = %body.label,
            kind = ?body.kind,
            distance = body.distance,
            patches = body.patches.len(),
            shadows = body.shadows.len(),
            "draw body"
        );
    }

    fn end_frame(&mut self) {}

    fn present(&mut self) {
        tracing::trace!(frame = self.frame, "present");
    }
}

/// Keeps the last frame's draws for inspection
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub frames_presented: usize,
    pub last_frame: Vec<DrawBody>,
    current: Vec<DrawBody>,
    in_frame: bool,
}

impl Renderer for RecordingRenderer {
    fn begin_frame(&mut self, _camera: &Camera) {
        self.current.clear();
        self.in_frame = true;
    }

    fn draw_body(&mut self, body: &DrawBody) {
        if self.in_frame {
            self.current.push(body.clone());
        }
    }

    fn end_frame(&mut self) {
        self.in_frame = false;
    }

    fn present(&mut self) {
        self.last_frame = std::mem::take(&mut self.current);
        self.frames_presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::galaxy::{BodyType, Galaxy};
    use crate::model::system_path::SystemPath;
    use crate::model::terrain::{DetailLevel, TerrainBody};

    fn test_game() -> Game {
        let galaxy = Galaxy::new(0);
        let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let body = system.bodies().iter().find(|b| b.body_type == BodyType::RockyPlanet).unwrap();
        let path = system.path_for(body.index).unwrap();
        Game::new(galaxy, &path, 0.0, 60.0, DetailLevel::VeryLow).unwrap()
    }

    #[test]
    fn test_render_draws_back_to_front() {
        let game = test_game();
        let mut orchestrator = RenderOrchestrator::new(Camera::new(800, 600));
        orchestrator.set_follow_player(false);
        orchestrator.camera_mut().position = DVec3::new(0.0, 5.0e12, 0.0);
        orchestrator.camera_mut().set_look_at(DVec3::ZERO);

        let mut renderer = RecordingRenderer::default();
        let stats = orchestrator.render(&game, &mut renderer);
        assert_eq!(renderer.frames_presented, 1);
        assert_eq!(stats.bodies_drawn, renderer.last_frame.len());
        assert_eq!(stats.bodies_drawn + stats.bodies_culled, game.space().body_count());
        let distances: Vec<f64> = renderer.last_frame.iter().map(|d| d.distance).collect();
        assert!(distances.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_looking_away_culls_everything() {
        let game = test_game();
        let mut orchestrator = RenderOrchestrator::new(Camera::new(800, 600));
        orchestrator.set_follow_player(false);
        orchestrator.camera_mut().position = DVec3::new(0.0, 1.0e12, 0.0);
        orchestrator.camera_mut().set_look_at(DVec3::new(0.0, 2.0e12, 0.0));

        let mut renderer = RecordingRenderer::default();
        let stats = orchestrator.render(&game, &mut renderer);
        assert_eq!(stats.bodies_drawn, 0);
        assert_eq!(stats.draw_calls, 0);
        assert!(renderer.last_frame.is_empty());
    }

    #[test]
    fn test_player_is_not_drawn() {
        let game = test_game();
        let mut orchestrator = RenderOrchestrator::new(Camera::new(800, 600));
        let mut renderer = RecordingRenderer::default();
        orchestrator.render(&game, &mut renderer);
        let player = game.player().unwrap();
        assert!(renderer.last_frame.iter().all(|d| d.id != player));
        assert_eq!(orchestrator.camera().position, game.space().body(player).unwrap().interp_pos());
    }

    fn shadow_space() -> (Space, BodyId, BodyId, BodyId) {
        let galaxy = Galaxy::new(0);
        let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let planet_sbody = system.bodies().iter().find(|b| b.is_terrain_body()).unwrap().clone();
        let mut space = Space::with_frames(system, 0.0);
        let root = space.frames().root();

        let terrain = |space: &mut Space, label: &str, x: f64, radius: f64| {
            let mut body = Body::new(label, root, BodyKind::Terrain(TerrainBody::new(&planet_sbody, DetailLevel::VeryLow)))
                .with_pos(DVec3::new(x, 0.0, 0.0))
                .with_size(radius, 1.0);
            body.set_interp(DVec3::new(x, 0.0, 0.0), DMat3::IDENTITY);
            space.add_body(body)
        };
        let lit = terrain(&mut space, "lit", 1.0e9, 6.0e6);
        let big = terrain(&mut space, "big", 0.9e9, 7.0e6);
        let small = terrain(&mut space, "small", 0.95e9, 1.0e6);
        terrain(&mut space, "behind", 1.1e9, 7.0e6);
        (space, lit, big, small)
    }

    #[test]
    fn test_shadows_ordered_by_strength() {
        let (space, lit, big, small) = shadow_space();
        let shadows = principal_shadows(&space, lit, DVec3::ZERO, MAX_SHADOWS);
        let occluders: Vec<BodyId> = shadows.iter().map(|s| s.occluder).collect();
        assert_eq!(occluders, vec![big, small]);
        assert!(shadows[0].strength > shadows[1].strength);

        let one = principal_shadows(&space, lit, DVec3::ZERO, 1);
        assert_eq!(one.len(), 1);
    }
}
