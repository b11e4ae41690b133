//! Bodies living in reference frames: stars, terrain bodies, starports and
//! ships.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use super::frame::FrameId;
use super::orbit::G;
use super::terrain::TerrainBody;

/// Stable handle of a body in a `Space`. Never reused within a space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/// Impacts slower than this (m/s) are a landing, faster ones are fatal
pub const SAFE_LANDING_SPEED: f64 = 25.0;
/// A ship must be within this distance (m) of a port to start docking
pub const DOCKING_RANGE: f64 = 5000.0;
/// Duration of the docking and undocking sequences (s)
pub const DOCK_TRANSITION_TIME: f64 = 10.0;
/// Separation speed when an undock finishes (m/s)
pub const UNDOCK_SPEED: f64 = 10.0;
/// Thrust acceleration at full input (m/s^2)
pub const SHIP_THRUST: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightState {
    Flying,
    Docking,
    Docked,
    Undocking,
    Landed,
    Hyperspace,
}

impl FlightState {
    /// States where render interpolation is pinned to the latest step
    pub fn is_dock_transition(&self) -> bool {
        matches!(self, FlightState::Docking | FlightState::Docked | FlightState::Undocking)
    }
}

/// Things that happened to a ship during a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShipEvent {
    Docked(BodyId),
    Undocked(BodyId),
    Landed(BodyId),
    Died,
}

/// Per-step control input, each axis in [-1, 1], in the ship's own axes
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShipControls {
    pub thrust: DVec3,
    pub yaw: f64,
    pub pitch: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ship {
    pub flight_state: FlightState,
    /// Hull integrity in [0, 1]; 0 is dead
    pub hull: f64,
    /// Port the ship is docking with, docked at or undocking from
    pub dock_target: Option<BodyId>,
    /// Seconds left of the current dock transition
    pub transition_timer: f64,
    #[serde(skip)]
    pub controls: ShipControls,
}

impl Default for Ship {
    fn default() -> Self {
        Self {
            flight_state: FlightState::Flying,
            hull: 1.0,
            dock_target: None,
            transition_timer: 0.0,
            controls: ShipControls::default(),
        }
    }
}

impl Ship {
    pub fn is_dead(&self) -> bool {
        self.hull <= 0.0
    }

    pub fn docked_at(port: BodyId) -> Self {
        Self {
            flight_state: FlightState::Docked,
            dock_target: Some(port),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub enum BodyKind {
    Star,
    Terrain(TerrainBody),
    /// Orbital or surface starport
    Starport { surface: bool },
    Ship(Ship),
}

#[derive(Debug)]
pub struct Body {
    pub label: String,
    pub frame: FrameId,
    /// Position, velocity and orientation relative to `frame`
    pub pos: DVec3,
    pub vel: DVec3,
    pub orient: DMat3,
    pub radius: f64,
    pub mass: f64,
    pub sbody_index: Option<u32>,
    pub kind: BodyKind,
    old_pos: DVec3,
    interp_pos: DVec3,
    interp_orient: DMat3,
}

impl Body {
    pub fn new(label: impl Into<String>, frame: FrameId, kind: BodyKind) -> Self {
        Self {
            label: label.into(),
            frame,
            pos: DVec3::ZERO,
            vel: DVec3::ZERO,
            orient: DMat3::IDENTITY,
            radius: 0.0,
            mass: 0.0,
            sbody_index: None,
            kind,
            old_pos: DVec3::ZERO,
            interp_pos: DVec3::ZERO,
            interp_orient: DMat3::IDENTITY,
        }
    }

    pub fn with_pos(mut self, pos: DVec3) -> Self {
        self.pos = pos;
        self.old_pos = pos;
        self
    }

    pub fn with_vel(mut self, vel: DVec3) -> Self {
        self.vel = vel;
        self
    }

    pub fn with_size(mut self, radius: f64, mass: f64) -> Self {
        self.radius = radius;
        self.mass = mass;
        self
    }

    pub fn with_sbody(mut self, index: u32) -> Self {
        self.sbody_index = Some(index);
        self
    }

    pub fn terrain(&self) -> Option<&TerrainBody> {
        match &self.kind {
            BodyKind::Terrain(t) => Some(t),
            _ => None,
        }
    }

    pub fn terrain_mut(&mut self) -> Option<&mut TerrainBody> {
        match &mut self.kind {
            BodyKind::Terrain(t) => Some(t),
            _ => None,
        }
    }

    pub fn ship(&self) -> Option<&Ship> {
        match &self.kind {
            BodyKind::Ship(s) => Some(s),
            _ => None,
        }
    }

    pub fn ship_mut(&mut self) -> Option<&mut Ship> {
        match &mut self.kind {
            BodyKind::Ship(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_dockable(&self) -> bool {
        matches!(self.kind, BodyKind::Starport { .. })
    }

    /// Radius enclosing everything drawn for the body
    pub fn clip_radius(&self) -> f64 {
        match &self.kind {
            BodyKind::Terrain(t) => t.max_feature_radius().max(self.radius),
            _ => self.radius,
        }
    }

    /// Remember the current position as the start of the next step. Also
    /// used after a frame switch, where the old position is meaningless.
    pub fn save_old_pos(&mut self) {
        self.old_pos = self.pos;
    }

    /// Frame-local position blended between the last two steps
    pub fn blended_pos(&self, alpha: f64) -> DVec3 {
        self.old_pos.lerp(self.pos, alpha.clamp(0.0, 1.0))
    }

    pub fn set_interp(&mut self, pos: DVec3, orient: DMat3) {
        self.interp_pos = pos;
        self.interp_orient = orient;
    }

    /// Interpolated world position, valid after `Space::update_interp`
    pub fn interp_pos(&self) -> DVec3 {
        self.interp_pos
    }

    pub fn interp_orient(&self) -> DMat3 {
        self.interp_orient
    }
}

/// Acceleration felt by a free body at `pos` relative to a frame whose origin
/// holds `mass` and which spins at `ang_speed` about Y.
pub fn frame_acceleration(pos: DVec3, vel: DVec3, mass: f64, ang_speed: f64) -> DVec3 {
    let r2 = pos.length_squared();
    let gravity = if mass > 0.0 && r2 > 0.0 {
        -pos * (G * mass / (r2 * r2.sqrt()))
    } else {
        DVec3::ZERO
    };
    if ang_speed == 0.0 {
        return gravity;
    }
    // coriolis and centrifugal terms of a rotating frame
    let omega = DVec3::new(0.0, ang_speed, 0.0);
    gravity - 2.0 * omega.cross(vel) - omega.cross(omega.cross(pos))
}

/// Integrate one flying step. Semi-implicit Euler on frame-local state.
pub fn integrate_flight(body: &mut Body, step: f64, frame_mass: f64, frame_ang_speed: f64) {
    let thrust = match &body.kind {
        BodyKind::Ship(ship) => body.orient * ship.controls.thrust.clamp(DVec3::splat(-1.0), DVec3::ONE) * SHIP_THRUST,
        _ => DVec3::ZERO,
    };
    if let BodyKind::Ship(ship) = &body.kind {
        let (yaw, pitch) = (ship.controls.yaw.clamp(-1.0, 1.0), ship.controls.pitch.clamp(-1.0, 1.0));
        if yaw != 0.0 || pitch != 0.0 {
            let turn = DMat3::from_rotation_y(yaw * step) * DMat3::from_rotation_x(pitch * step);
            body.orient = body.orient * turn;
        }
    }
    let accel = frame_acceleration(body.pos, body.vel, frame_mass, frame_ang_speed) + thrust;
    body.vel += accel * step;
    body.pos += body.vel * step;
}
