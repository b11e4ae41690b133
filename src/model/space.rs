//! The contents of one star system: its frame tree and every body in it.

use std::collections::{BTreeMap, HashMap};

use glam::{DMat3, DVec3};

use super::body::{
    integrate_flight, Body, BodyId, BodyKind, FlightState, Ship, ShipEvent, DOCKING_RANGE, DOCK_TRANSITION_TIME,
    SAFE_LANDING_SPEED, UNDOCK_SPEED,
};
use super::frame::{FrameDesc, FrameGraph, FrameId};
use super::galaxy::{BodyType, StarSystem, SystemBody};
use super::terrain::{DetailLevel, PatchMesh, PatchRequest, TerrainBody};

/// Rotating frames extend this many radii from the body centre
const ROTATING_FRAME_RADII: f64 = 1.5;

pub struct Space {
    system: StarSystem,
    frames: FrameGraph,
    bodies: BTreeMap<BodyId, Body>,
    next_id: u32,
}

impl Space {
    /// Build the frame tree and every system body at game time `time`
    pub fn new(system: StarSystem, time: f64, detail: DetailLevel) -> Self {
        let mut space = Self::with_frames(system, time);
        space.populate(time, detail);
        space.update_interp(1.0);
        tracing::info!(system = %space.system.path, bodies = space.bodies.len(), frames = space.frames.len(), "built space");
        space
    }

    /// Frame tree only, for loading where bodies come from the save
    pub fn with_frames(system: StarSystem, time: f64) -> Self {
        let mut frames = FrameGraph::new(system.name.clone());
        let mut nonrot: HashMap<u32, FrameId> = HashMap::new();
        nonrot.insert(system.root().index, frames.root());

        for sbody in system.bodies() {
            if !sbody.is_terrain_body() {
                continue;
            }
            let Some(parent) = sbody.parent.and_then(|p| nonrot.get(&p).copied()) else {
                tracing::warn!(sbody = sbody.index, "terrain body without a parent frame");
                continue;
            };
            let rot_radius = sbody.radius * ROTATING_FRAME_RADII;
            let orbit_frame = frames.add_frame(
                parent,
                FrameDesc {
                    sbody_index: Some(sbody.index),
                    orbit: sbody.orbit,
                    ..FrameDesc::non_rotating(sbody.name.clone(), sphere_of_influence(&system, sbody).max(rot_radius * 2.0))
                },
            );
            let Ok(orbit_frame) = orbit_frame else { continue };
            let rot_frame = frames.add_frame(
                orbit_frame,
                FrameDesc {
                    sbody_index: Some(sbody.index),
                    rotating: true,
                    ang_speed: sbody.angular_speed(),
                    ..FrameDesc::non_rotating(format!("{} (rot)", sbody.name), rot_radius)
                },
            );
            if rot_frame.is_ok() {
                nonrot.insert(sbody.index, orbit_frame);
            }
        }
        frames.init_at(time);

        Self { system, frames, bodies: BTreeMap::new(), next_id: 1 }
    }

    fn populate(&mut self, time: f64, detail: DetailLevel) {
        let system = self.system.clone();
        for sbody in system.bodies() {
            let body = match sbody.body_type {
                BodyType::Star => Body::new(sbody.name.clone(), self.frames.root(), BodyKind::Star),
                BodyType::StarportOrbital | BodyType::StarportSurface => match self.place_starport(sbody, time) {
                    Some(body) => body,
                    None => continue,
                },
                _ => {
                    let Some(frame) = self.frames.frame_for_body(sbody.index, true) else {
                        continue;
                    };
                    Body::new(sbody.name.clone(), frame, BodyKind::Terrain(TerrainBody::new(sbody, detail)))
                }
            };
            self.add_body(body.with_size(sbody.radius, sbody.mass).with_sbody(sbody.index));
        }
    }

    fn place_starport(&self, sbody: &SystemBody, time: f64) -> Option<Body> {
        let parent = sbody.parent?;
        let surface = sbody.body_type == BodyType::StarportSurface;
        let (frame, pos, orient) = if surface {
            let frame = self.frames.frame_for_body(parent, true)?;
            let (lat, lon) = sbody.surface_position.unwrap_or((0.0, 0.0));
            let up = DVec3::new(lat.cos() * lon.cos(), lat.sin(), lat.cos() * lon.sin());
            let terrain = self.body_for_sbody(parent).and_then(|id| self.bodies.get(&id)).and_then(|b| b.terrain())?;
            let side = up.any_orthonormal_vector();
            (frame, up * terrain.get_terrain_height(up), DMat3::from_cols(side, up, side.cross(up)))
        } else {
            let frame = self.frames.frame_for_body(parent, false)?;
            (frame, sbody.orbit?.position_at(time), DMat3::IDENTITY)
        };
        let mut body = Body::new(sbody.name.clone(), frame, BodyKind::Starport { surface }).with_pos(pos);
        body.orient = orient;
        Some(body)
    }

    pub fn system(&self) -> &StarSystem {
        &self.system
    }

    pub fn frames(&self) -> &FrameGraph {
        &self.frames
    }

    pub fn add_body(&mut self, body: Body) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, body);
        id
    }

    pub fn remove_body(&mut self, id: BodyId) -> Option<Body> {
        self.bodies.remove(&id)
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &Body)> {
        self.bodies.iter().map(|(id, b)| (*id, b))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body_for_sbody(&self, sbody_index: u32) -> Option<BodyId> {
        self.bodies.iter().find(|(_, b)| b.sbody_index == Some(sbody_index) && !matches!(b.kind, BodyKind::Ship(_))).map(|(id, _)| *id)
    }

    /// Mass at the origin of `frame` (the body the frame is attached to)
    fn frame_mass(&self, frame: FrameId) -> f64 {
        let sbody = if frame == self.frames.root() {
            Some(self.system.root().index)
        } else {
            self.frames.get(frame).and_then(|f| f.sbody_index())
        };
        sbody.and_then(|i| self.system.system_body_by_index(i)).map_or(0.0, |s| s.mass)
    }

    /// World position of a body at the latest step
    pub fn world_position(&self, id: BodyId) -> Option<DVec3> {
        let body = self.bodies.get(&id)?;
        self.frames.position_in(body.frame, body.pos, self.frames.root()).ok()
    }

    /// Advance everything by one physics step ending at game time `time`
    pub fn time_step(&mut self, step: f64, time: f64) -> Vec<(BodyId, ShipEvent)> {
        self.frames.update_orbit_rails(time, step);
        for body in self.bodies.values_mut() {
            body.save_old_pos();
        }

        // starports on rails
        for body in self.bodies.values_mut() {
            if !matches!(body.kind, BodyKind::Starport { surface: false }) {
                continue;
            }
            let orbit = body.sbody_index.and_then(|i| self.system.system_body_by_index(i)).and_then(|s| s.orbit);
            if let Some(orbit) = orbit {
                let pos = orbit.position_at(time);
                if step > 0.0 {
                    body.vel = (pos - body.pos) / step;
                }
                body.pos = pos;
            }
        }

        let mut events = Vec::new();
        let ships: Vec<BodyId> = self.bodies.iter().filter(|(_, b)| b.ship().is_some()).map(|(id, _)| *id).collect();
        for id in ships {
            let Some(mut body) = self.bodies.remove(&id) else { continue };
            if let Some(event) = self.step_ship(&mut body, step) {
                events.push((id, event));
            }
            self.bodies.insert(id, body);
        }
        events
    }

    fn step_ship(&self, body: &mut Body, step: f64) -> Option<ShipEvent> {
        let ship = body.ship()?.clone();
        if ship.is_dead() {
            return None;
        }
        match ship.flight_state {
            FlightState::Flying => self.step_flying(body, step),
            FlightState::Docking | FlightState::Docked | FlightState::Undocking => self.step_docking(body, &ship, step),
            FlightState::Landed => {
                if ship.controls.thrust.length_squared() > 0.0 {
                    if let Some(s) = body.ship_mut() {
                        s.flight_state = FlightState::Flying;
                    }
                    self.step_flying(body, step)
                } else {
                    body.vel = DVec3::ZERO;
                    None
                }
            }
            FlightState::Hyperspace => None,
        }
    }

    fn step_flying(&self, body: &mut Body, step: f64) -> Option<ShipEvent> {
        let (mass, ang_speed) = (self.frame_mass(body.frame), self.frames.get(body.frame).map_or(0.0, |f| f.ang_speed()));
        integrate_flight(body, step, mass, ang_speed);

        if let Some(event) = self.check_terrain_contact(body) {
            return Some(event);
        }

        // switch frames when leaving or entering a region of influence
        let Ok(target) = self.frames.containing_frame(body.frame, body.pos) else {
            return None;
        };
        if target != body.frame {
            let converted = (
                self.frames.position_in(body.frame, body.pos, target),
                self.frames.velocity_in(body.frame, body.pos, body.vel, target),
                self.frames.orient_in(body.frame, body.orient, target),
            );
            if let (Ok(pos), Ok(vel), Ok(orient)) = converted {
                tracing::debug!(body = %body.label, from = ?body.frame, to = ?target, "frame switch");
                body.frame = target;
                body.pos = pos;
                body.vel = vel;
                body.orient = orient;
                body.save_old_pos();
            }
        }
        None
    }

    /// Land or crash when below the terrain of the body the ship's frame belongs to
    fn check_terrain_contact(&self, body: &mut Body) -> Option<ShipEvent> {
        let sbody = self.frames.get(body.frame)?.sbody_index()?;
        let planet_id = self.body_for_sbody(sbody)?;
        let planet = self.bodies.get(&planet_id)?;
        let terrain = planet.terrain()?;

        let local = self.frames.position_in(body.frame, body.pos, planet.frame).ok()? - planet.pos;
        let ground = terrain.get_terrain_height(local) + body.radius;
        if local.length() >= ground {
            return None;
        }
        let speed = self.frames.velocity_in(body.frame, body.pos, body.vel, planet.frame).ok()?.length();
        let up = local.normalize_or_zero();

        body.frame = planet.frame;
        body.pos = planet.pos + up * ground;
        body.vel = DVec3::ZERO;
        body.save_old_pos();
        let ship = body.ship_mut()?;
        if speed < SAFE_LANDING_SPEED {
            ship.flight_state = FlightState::Landed;
            tracing::info!(speed, "landed");
            Some(ShipEvent::Landed(planet_id))
        } else {
            ship.hull = 0.0;
            tracing::info!(speed, "crashed into terrain");
            Some(ShipEvent::Died)
        }
    }

    fn step_docking(&self, body: &mut Body, ship: &Ship, step: f64) -> Option<ShipEvent> {
        let port = ship.dock_target.and_then(|id| self.bodies.get(&id).map(|b| (id, b)));
        let Some((port_id, port)) = port else {
            // port went away under us
            tracing::warn!(body = %body.label, "dock target vanished, resuming flight");
            let s = body.ship_mut()?;
            s.flight_state = FlightState::Flying;
            s.dock_target = None;
            return None;
        };

        if body.frame != port.frame {
            if let (Ok(pos), Ok(vel)) = (
                self.frames.position_in(body.frame, body.pos, port.frame),
                self.frames.velocity_in(body.frame, body.pos, body.vel, port.frame),
            ) {
                body.frame = port.frame;
                body.pos = pos;
                body.vel = vel;
                body.save_old_pos();
            }
        }

        let timer = (ship.transition_timer - step).max(0.0);
        match ship.flight_state {
            FlightState::Docking => {
                // close the remaining gap evenly over the timer
                let remaining = ship.transition_timer.max(step);
                body.pos += (port.pos - body.pos) * (step / remaining).min(1.0);
                body.vel = port.vel;
                let s = body.ship_mut()?;
                s.transition_timer = timer;
                if timer <= 0.0 {
                    s.flight_state = FlightState::Docked;
                    body.pos = port.pos;
                    body.orient = port.orient;
                    return Some(ShipEvent::Docked(port_id));
                }
                None
            }
            FlightState::Docked => {
                body.pos = port.pos;
                body.vel = port.vel;
                body.orient = port.orient;
                None
            }
            _ => {
                let away = undock_direction(port);
                body.pos = port.pos + away * (port.radius * (1.0 - timer / DOCK_TRANSITION_TIME));
                body.vel = port.vel;
                let s = body.ship_mut()?;
                s.transition_timer = timer;
                if timer <= 0.0 {
                    s.flight_state = FlightState::Flying;
                    s.dock_target = None;
                    body.vel = port.vel + away * UNDOCK_SPEED;
                    return Some(ShipEvent::Undocked(port_id));
                }
                None
            }
        }
    }

    /// Start docking `ship_id` with the nearest port in range
    pub fn request_dock(&mut self, ship_id: BodyId) -> Option<BodyId> {
        let ship_world = self.world_position(ship_id)?;
        if self.bodies.get(&ship_id)?.ship()?.flight_state != FlightState::Flying {
            return None;
        }
        let port = self
            .bodies
            .iter()
            .filter(|(_, b)| b.is_dockable())
            .filter_map(|(id, _)| Some((*id, (self.world_position(*id)? - ship_world).length())))
            .filter(|(_, d)| *d < DOCKING_RANGE)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)?;

        let ship = self.bodies.get_mut(&ship_id)?.ship_mut()?;
        ship.flight_state = FlightState::Docking;
        ship.dock_target = Some(port);
        ship.transition_timer = DOCK_TRANSITION_TIME;
        tracing::info!(?port, "docking clearance granted");
        Some(port)
    }

    pub fn request_undock(&mut self, ship_id: BodyId) -> bool {
        let Some(ship) = self.bodies.get_mut(&ship_id).and_then(|b| b.ship_mut()) else {
            return false;
        };
        if ship.flight_state != FlightState::Docked {
            return false;
        }
        ship.flight_state = FlightState::Undocking;
        ship.transition_timer = DOCK_TRANSITION_TIME;
        true
    }

    /// Put a ship docked at `port`
    pub fn spawn_docked(&mut self, port: BodyId, label: &str) -> Option<BodyId> {
        let p = self.bodies.get(&port)?;
        if !p.is_dockable() {
            return None;
        }
        let mut body = Body::new(label, p.frame, BodyKind::Ship(Ship::docked_at(port))).with_pos(p.pos).with_vel(p.vel).with_size(20.0, 1.0e5);
        body.orient = p.orient;
        Some(self.add_body(body))
    }

    /// Put a ship in a circular orbit `altitude_radii` radii above a terrain body
    pub fn spawn_in_orbit(&mut self, planet: BodyId, altitude_radii: f64, label: &str) -> Option<BodyId> {
        let p = self.bodies.get(&planet)?;
        let sbody = p.sbody_index?;
        let frame = self.frames.frame_for_body(sbody, false)?;
        let r = p.clip_radius() * (1.0 + altitude_radii);
        let speed = super::orbit::Orbit::circular_speed(r, p.mass);
        let body = Body::new(label, frame, BodyKind::Ship(Ship::default()))
            .with_pos(DVec3::new(r, 0.0, 0.0))
            .with_vel(DVec3::new(0.0, 0.0, -speed))
            .with_size(20.0, 1.0e5);
        Some(self.add_body(body))
    }

    /// Blend every frame and body between the last two steps
    pub fn update_interp(&mut self, alpha: f64) {
        self.frames.update_interp_transforms(alpha);
        for body in self.bodies.values_mut() {
            let Some(frame) = self.frames.get(body.frame) else { continue };
            let pos = frame.interp_position() + frame.interp_orient() * body.blended_pos(alpha);
            let orient = frame.interp_orient() * body.orient;
            body.set_interp(pos, orient);
        }
    }

    /// Refresh terrain LOD for a camera at `camera_world`, handing out at
    /// most `budget` patch requests across all bodies, nearest body first
    pub fn update_lod(&mut self, camera_world: DVec3, budget: usize) -> Vec<(BodyId, PatchRequest)> {
        let root = self.frames.root();
        let mut targets: Vec<(BodyId, DVec3)> = Vec::new();
        for (id, body) in &self.bodies {
            if body.terrain().is_none() {
                continue;
            }
            let Ok(in_frame) = self.frames.position_in(root, camera_world, body.frame) else { continue };
            targets.push((*id, body.orient.transpose() * (in_frame - body.pos)));
        }
        targets.sort_by(|a, b| a.1.length_squared().total_cmp(&b.1.length_squared()));

        let mut requests = Vec::new();
        for (id, camera_local) in targets {
            let remaining = budget.saturating_sub(requests.len());
            let Some(terrain) = self.bodies.get_mut(&id).and_then(|b| b.terrain_mut()) else { continue };
            requests.extend(terrain.update_lod(camera_local, remaining).into_iter().map(|r| (id, r)));
        }
        requests
    }

    /// Hand a finished patch to its body, if the body still exists
    pub fn merge_patch(&mut self, id: BodyId, patch: PatchMesh) -> bool {
        match self.bodies.get_mut(&id).and_then(|b| b.terrain_mut()) {
            Some(terrain) => terrain.merge_patch(patch),
            None => {
                tracing::trace!(?id, "patch for a body that no longer exists");
                false
            }
        }
    }

    pub fn on_change_detail_level(&mut self, detail: DetailLevel) {
        for body in self.bodies.values_mut() {
            let Some(sbody) = body.sbody_index.and_then(|i| self.system.system_body_by_index(i)) else { continue };
            if let Some(terrain) = body.terrain_mut() {
                terrain.on_change_detail_level(sbody, detail);
            }
        }
        tracing::info!(?detail, "planet detail changed");
    }

    /// Whether ship `id` is docking, docked or undocking
    pub fn is_dock_transition(&self, id: BodyId) -> bool {
        self.bodies.get(&id).and_then(|b| b.ship()).is_some_and(|s| s.flight_state.is_dock_transition())
    }
}

fn undock_direction(port: &Body) -> DVec3 {
    match port.kind {
        BodyKind::Starport { surface: true } => port.pos.normalize_or_zero(),
        _ => port.orient * DVec3::Y,
    }
}

/// Hill-sphere style radius within which a body dominates
fn sphere_of_influence(system: &StarSystem, sbody: &SystemBody) -> f64 {
    let parent_mass = sbody.parent.and_then(|p| system.system_body_by_index(p)).map_or(0.0, |p| p.mass);
    match sbody.orbit {
        Some(orbit) if parent_mass > 0.0 => orbit.semi_major_axis * (sbody.mass / parent_mass).powf(0.4),
        _ => f64::INFINITY,
    }
}
