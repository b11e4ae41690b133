//! Hierarchical reference frames.
//!
//! Frames live in an arena and refer to each other by `FrameId`. A frame's
//! state is relative to its parent; world state is recomputed top-down by
//! `update_orbit_rails`, parents before children.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::orbit::Orbit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown frame {0:?}")]
    UnknownFrame(FrameId),
    #[error("reparenting {frame:?} under {parent:?} would create a cycle")]
    WouldCycle { frame: FrameId, parent: FrameId },
    #[error("frame {0:?} follows an orbit and can't be reparented")]
    OnRails(FrameId),
}

/// How a new frame moves relative to its parent
#[derive(Clone, Debug)]
pub struct FrameDesc {
    pub label: String,
    pub sbody_index: Option<u32>,
    /// Rotates with the body it is attached to
    pub rotating: bool,
    pub ang_speed: f64,
    pub orbit: Option<Orbit>,
    /// Region of influence (metres); a ship inside it belongs to the frame
    pub radius: f64,
    pub pos: DVec3,
}

impl FrameDesc {
    pub fn non_rotating(label: impl Into<String>, radius: f64) -> Self {
        Self {
            label: label.into(),
            sbody_index: None,
            rotating: false,
            ang_speed: 0.0,
            orbit: None,
            radius,
            pos: DVec3::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    label: String,
    sbody_index: Option<u32>,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
    rotating: bool,
    ang_speed: f64,
    orbit: Option<Orbit>,
    radius: f64,

    // relative to the parent
    pos: DVec3,
    vel: DVec3,
    orient: DMat3,
    angle: f64,
    old_pos: DVec3,
    old_angle: f64,

    // cached world state, valid after update_orbit_rails
    world_pos: DVec3,
    world_vel: DVec3,
    world_orient: DMat3,
    world_ang_vel: DVec3,

    // interpolated world state for rendering
    interp_pos: DVec3,
    interp_orient: DMat3,
}

impl Frame {
    fn new(desc: FrameDesc, parent: Option<FrameId>) -> Self {
        Self {
            label: desc.label,
            sbody_index: desc.sbody_index,
            parent,
            children: Vec::new(),
            rotating: desc.rotating,
            ang_speed: if desc.rotating { desc.ang_speed } else { 0.0 },
            orbit: desc.orbit,
            radius: desc.radius,
            pos: desc.pos,
            vel: DVec3::ZERO,
            orient: DMat3::IDENTITY,
            angle: 0.0,
            old_pos: desc.pos,
            old_angle: 0.0,
            world_pos: DVec3::ZERO,
            world_vel: DVec3::ZERO,
            world_orient: DMat3::IDENTITY,
            world_ang_vel: DVec3::ZERO,
            interp_pos: DVec3::ZERO,
            interp_orient: DMat3::IDENTITY,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn sbody_index(&self) -> Option<u32> {
        self.sbody_index
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn children(&self) -> &[FrameId] {
        &self.children
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating
    }

    pub fn ang_speed(&self) -> f64 {
        self.ang_speed
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn position(&self) -> DVec3 {
        self.pos
    }

    pub fn velocity(&self) -> DVec3 {
        self.vel
    }

    pub fn orient(&self) -> DMat3 {
        self.orient
    }

    pub fn world_position(&self) -> DVec3 {
        self.world_pos
    }

    pub fn world_velocity(&self) -> DVec3 {
        self.world_vel
    }

    pub fn world_orient(&self) -> DMat3 {
        self.world_orient
    }

    pub fn interp_position(&self) -> DVec3 {
        self.interp_pos
    }

    pub fn interp_orient(&self) -> DMat3 {
        self.interp_orient
    }
}

/// Arena of frames forming a single rooted tree
#[derive(Clone, Debug)]
pub struct FrameGraph {
    frames: Vec<Frame>,
    /// parent-before-child traversal order
    order: Vec<FrameId>,
}

impl FrameGraph {
    pub fn new(root_label: impl Into<String>) -> Self {
        let root = Frame::new(FrameDesc::non_rotating(root_label, f64::INFINITY), None);
        Self { frames: vec![root], order: vec![FrameId(0)] }
    }

    pub fn root(&self) -> FrameId {
        FrameId(0)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.index())
    }

    pub fn contains(&self, id: FrameId) -> bool {
        id.index() < self.frames.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.order.iter().copied()
    }

    /// Frame attached to system body `sbody_index`, rotating or not
    pub fn frame_for_body(&self, sbody_index: u32, rotating: bool) -> Option<FrameId> {
        self.frames
            .iter()
            .position(|f| f.sbody_index == Some(sbody_index) && f.rotating == rotating)
            .map(|i| FrameId(i as u32))
    }

    pub fn add_frame(&mut self, parent: FrameId, desc: FrameDesc) -> Result<FrameId, FrameError> {
        if !self.contains(parent) {
            return Err(FrameError::UnknownFrame(parent));
        }
        let id = FrameId(self.frames.len() as u32);
        self.frames.push(Frame::new(desc, Some(parent)));
        self.frames[parent.index()].children.push(id);
        self.rebuild_order();
        Ok(id)
    }

    fn rebuild_order(&mut self) {
        let mut order = Vec::with_capacity(self.frames.len());
        let mut queue = std::collections::VecDeque::from([FrameId(0)]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.frames[id.index()].children.iter().copied());
        }
        self.order = order;
    }

    /// Advance every frame to game time `time`. `timestep` is the size of
    /// the step that got us here and is used to derive velocities.
    pub fn update_orbit_rails(&mut self, time: f64, timestep: f64) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            let frame = &mut self.frames[id.index()];

            frame.old_pos = frame.pos;
            if let Some(orbit) = frame.orbit {
                frame.pos = orbit.position_at(time);
                if timestep > 0.0 {
                    frame.vel = (frame.pos - frame.old_pos) / timestep;
                }
            }

            frame.old_angle = frame.angle;
            if frame.rotating {
                frame.angle = time * frame.ang_speed;
                frame.orient = DMat3::from_rotation_y(frame.angle);
            }

            self.update_world(id);
        }
    }

    /// Set every frame's state directly at `time` with no previous step, as
    /// after construction or loading.
    pub fn init_at(&mut self, time: f64) {
        self.update_orbit_rails(time, 0.0);
        for frame in &mut self.frames {
            frame.old_pos = frame.pos;
            frame.old_angle = frame.angle;
            if let Some(orbit) = frame.orbit {
                // central difference so the first frame has a sane velocity
                let dt = 1.0;
                frame.vel = (orbit.position_at(time + dt) - orbit.position_at(time - dt)) / (2.0 * dt);
            }
        }
        for i in 0..self.order.len() {
            let id = self.order[i];
            self.update_world(id);
        }
        self.update_interp_transforms(1.0);
    }

    fn update_world(&mut self, id: FrameId) {
        let (p_pos, p_vel, p_orient, p_ang_vel) = match self.frames[id.index()].parent {
            Some(parent) => {
                let p = &self.frames[parent.index()];
                (p.world_pos, p.world_vel, p.world_orient, p.world_ang_vel)
            }
            None => (DVec3::ZERO, DVec3::ZERO, DMat3::IDENTITY, DVec3::ZERO),
        };
        let frame = &mut self.frames[id.index()];
        let offset = p_orient * frame.pos;
        frame.world_pos = p_pos + offset;
        frame.world_vel = p_vel + p_orient * frame.vel + p_ang_vel.cross(offset);
        frame.world_orient = p_orient * frame.orient;
        frame.world_ang_vel = p_ang_vel + p_orient * DVec3::new(0.0, frame.ang_speed, 0.0);
    }

    /// Blend between the previous and current step for rendering
    pub fn update_interp_transforms(&mut self, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0);
        for i in 0..self.order.len() {
            let id = self.order[i];
            let (p_pos, p_orient) = match self.frames[id.index()].parent {
                Some(parent) => {
                    let p = &self.frames[parent.index()];
                    (p.interp_pos, p.interp_orient)
                }
                None => (DVec3::ZERO, DMat3::IDENTITY),
            };
            let frame = &mut self.frames[id.index()];
            let pos = frame.old_pos.lerp(frame.pos, alpha);
            let orient = if frame.rotating {
                DMat3::from_rotation_y(frame.old_angle + (frame.angle - frame.old_angle) * alpha)
            } else {
                frame.orient
            };
            frame.interp_pos = p_pos + p_orient * pos;
            frame.interp_orient = p_orient * orient;
        }
    }

    fn frame(&self, id: FrameId) -> Result<&Frame, FrameError> {
        self.frames.get(id.index()).ok_or(FrameError::UnknownFrame(id))
    }

    /// Express point `pos` of frame `from` in frame `to`
    pub fn position_in(&self, from: FrameId, pos: DVec3, to: FrameId) -> Result<DVec3, FrameError> {
        let f = self.frame(from)?;
        let t = self.frame(to)?;
        let world = f.world_pos + f.world_orient * pos;
        Ok(t.world_orient.transpose() * (world - t.world_pos))
    }

    /// Express the velocity of a point at `pos` moving with `vel` in frame
    /// `from` as seen from frame `to`, including frame rotation
    pub fn velocity_in(&self, from: FrameId, pos: DVec3, vel: DVec3, to: FrameId) -> Result<DVec3, FrameError> {
        let f = self.frame(from)?;
        let t = self.frame(to)?;
        let offset = f.world_orient * pos;
        let world_pos = f.world_pos + offset;
        let world_vel = f.world_vel + f.world_orient * vel + f.world_ang_vel.cross(offset);
        let rel = world_vel - t.world_vel - t.world_ang_vel.cross(world_pos - t.world_pos);
        Ok(t.world_orient.transpose() * rel)
    }

    pub fn orient_in(&self, from: FrameId, orient: DMat3, to: FrameId) -> Result<DMat3, FrameError> {
        let f = self.frame(from)?;
        let t = self.frame(to)?;
        Ok(t.world_orient.transpose() * f.world_orient * orient)
    }

    /// Interpolated world position of a point in frame `from`, for rendering
    pub fn interp_world_position(&self, from: FrameId, pos: DVec3) -> Result<DVec3, FrameError> {
        let f = self.frame(from)?;
        Ok(f.interp_pos + f.interp_orient * pos)
    }

    /// Deepest frame whose region contains `pos` (given in frame `from`)
    pub fn containing_frame(&self, from: FrameId, pos: DVec3) -> Result<FrameId, FrameError> {
        let world = {
            let f = self.frame(from)?;
            f.world_pos + f.world_orient * pos
        };
        let mut current = self.root();
        'descend: loop {
            for &child in &self.frames[current.index()].children {
                let c = &self.frames[child.index()];
                if (world - c.world_pos).length() < c.radius {
                    current = child;
                    continue 'descend;
                }
            }
            return Ok(current);
        }
    }

    pub fn is_ancestor(&self, ancestor: FrameId, of: FrameId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.frames.get(id.index()).and_then(|f| f.parent);
        }
        false
    }

    /// Move `frame` under `new_parent`, keeping its world position and
    /// velocity. The new relative state is derived from the current world
    /// state.
    pub fn reparent(&mut self, frame: FrameId, new_parent: FrameId) -> Result<(), FrameError> {
        self.frame(frame)?;
        self.frame(new_parent)?;
        if self.is_ancestor(frame, new_parent) {
            return Err(FrameError::WouldCycle { frame, parent: new_parent });
        }
        if self.frames[frame.index()].orbit.is_some() {
            return Err(FrameError::OnRails(frame));
        }
        let Some(old_parent) = self.frames[frame.index()].parent else {
            return Err(FrameError::WouldCycle { frame, parent: new_parent });
        };

        let pos = self.position_in(old_parent, self.frames[frame.index()].pos, new_parent)?;
        let vel = self.velocity_in(old_parent, self.frames[frame.index()].pos, self.frames[frame.index()].vel, new_parent)?;
        let orient = self.orient_in(old_parent, self.frames[frame.index()].orient, new_parent)?;

        self.frames[old_parent.index()].children.retain(|c| *c != frame);
        self.frames[new_parent.index()].children.push(frame);
        let f = &mut self.frames[frame.index()];
        f.parent = Some(new_parent);
        f.pos = pos;
        f.old_pos = pos;
        f.vel = vel;
        f.orient = orient;
        self.rebuild_order();

        // refresh world state for the moved subtree
        let subtree: Vec<FrameId> = self.order.iter().copied().filter(|id| self.is_ancestor(frame, *id)).collect();
        for id in subtree {
            self.update_world(id);
        }
        tracing::debug!(?frame, ?old_parent, ?new_parent, "reparented frame");
        Ok(())
    }
}
