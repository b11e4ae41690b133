//! Saved games.
//!
//! A save is a JSON document keyed by section. Only indices into tables that
//! are rebuilt at load time are stored for generated content: the
//! `system_path` section names the star system, and each terrain body keeps
//! the `index_for_system_body` of its descriptor. Frames are not stored; they
//! are regenerated from the system and evaluated at the saved time.

use std::fs;
use std::path::{Path, PathBuf};

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use super::body::{Body, BodyId, BodyKind, FlightState, Ship};
use super::frame::FrameId;
use super::galaxy::Galaxy;
use super::game::{Game, TimeAccel};
use super::space::Space;
use super::system_path::{SystemPath, SystemPathRecord};
use super::terrain::{DetailLevel, TerrainBody};
use crate::error::PersistenceError;

pub const SAVE_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveDocument {
    pub version: u32,
    pub time: f64,
    pub time_accel: TimeAccel,
    pub galaxy_seed: u64,
    pub system_path: SystemPathRecord,
    pub bodies: Vec<BodyRecord>,
    /// Index into `bodies`
    pub player: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub label: String,
    pub frame: u32,
    pub pos: DVec3,
    pub vel: DVec3,
    pub orient: DMat3,
    pub radius: f64,
    pub mass: f64,
    pub kind: BodyKindRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKindRecord {
    Star { index_for_system_body: u32 },
    TerrainBody { index_for_system_body: u32 },
    Starport { index_for_system_body: u32, surface: bool },
    Ship(ShipRecord),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShipRecord {
    pub flight_state: FlightState,
    pub hull: f64,
    pub transition_timer: f64,
    /// Index into `bodies`
    pub dock_target: Option<usize>,
}

/// Capture the state of `game`. Callers check `Game::save_guard` first.
pub fn snapshot(game: &Game) -> Result<SaveDocument, PersistenceError> {
    let space = game.space();
    let ids: Vec<BodyId> = space.bodies().map(|(id, _)| id).collect();
    let index_of = |id: BodyId| ids.iter().position(|i| *i == id);

    let mut bodies = Vec::with_capacity(ids.len());
    for (_, body) in space.bodies() {
        let sbody = || body.sbody_index.ok_or_else(|| PersistenceError::corrupt(format!("{} has no system body", body.label)));
        let kind = match &body.kind {
            BodyKind::Star => BodyKindRecord::Star { index_for_system_body: sbody()? },
            BodyKind::Terrain(terrain) => BodyKindRecord::TerrainBody { index_for_system_body: terrain.sbody_index() },
            BodyKind::Starport { surface } => BodyKindRecord::Starport { index_for_system_body: sbody()?, surface: *surface },
            BodyKind::Ship(ship) => BodyKindRecord::Ship(ShipRecord {
                flight_state: ship.flight_state,
                hull: ship.hull,
                transition_timer: ship.transition_timer,
                dock_target: ship.dock_target.and_then(index_of),
            }),
        };
        bodies.push(BodyRecord {
            label: body.label.clone(),
            frame: body.frame.0,
            pos: body.pos,
            vel: body.vel,
            orient: body.orient,
            radius: body.radius,
            mass: body.mass,
            kind,
        });
    }

    let player = game
        .player()
        .and_then(index_of)
        .ok_or_else(|| PersistenceError::corrupt("no player to save"))?;

    Ok(SaveDocument {
        version: SAVE_VERSION,
        time: game.time(),
        time_accel: game.time_accel(),
        galaxy_seed: game.galaxy().seed,
        system_path: game.system_path().to_record(),
        bodies,
        player,
    })
}

/// Rebuild a game from a save document, re-deriving every generated table
pub fn restore(doc: SaveDocument, physics_hz: f64, detail: DetailLevel) -> Result<Game, PersistenceError> {
    let galaxy = Galaxy::new(doc.galaxy_seed);
    let path = SystemPath::from_record(&doc.system_path).ok_or_else(|| PersistenceError::corrupt("invalid system_path"))?;
    let system = galaxy
        .star_system(&path)
        .ok_or_else(|| PersistenceError::corrupt(format!("system {} does not exist", path)))?;
    let mut space = Space::with_frames(system.clone(), doc.time);

    let sbody_at = |index: u32| {
        system.system_body_by_index(index).ok_or_else(|| {
            PersistenceError::corrupt(format!("index_for_system_body {} out of range ({} bodies)", index, system.body_count()))
        })
    };

    let mut ids = Vec::with_capacity(doc.bodies.len());
    let mut docks = Vec::new();
    for (n, record) in doc.bodies.iter().enumerate() {
        let frame = FrameId(record.frame);
        if !space.frames().contains(frame) {
            return Err(PersistenceError::corrupt(format!("body {} refers to missing frame {}", n, record.frame)));
        }
        let (kind, sbody_index) = match &record.kind {
            BodyKindRecord::Star { index_for_system_body } => {
                sbody_at(*index_for_system_body)?;
                (BodyKind::Star, Some(*index_for_system_body))
            }
            BodyKindRecord::TerrainBody { index_for_system_body } => {
                let sbody = sbody_at(*index_for_system_body)?;
                if !sbody.is_terrain_body() {
                    return Err(PersistenceError::corrupt(format!("system body {} has no terrain", sbody.index)));
                }
                let mut terrain = TerrainBody::uninit(*index_for_system_body);
                terrain.init(sbody, detail);
                (BodyKind::Terrain(terrain), Some(*index_for_system_body))
            }
            BodyKindRecord::Starport { index_for_system_body, surface } => {
                sbody_at(*index_for_system_body)?;
                (BodyKind::Starport { surface: *surface }, Some(*index_for_system_body))
            }
            BodyKindRecord::Ship(rec) => {
                if let Some(target) = rec.dock_target {
                    docks.push((n, target));
                }
                let ship = Ship {
                    flight_state: rec.flight_state,
                    hull: rec.hull,
                    transition_timer: rec.transition_timer,
                    ..Ship::default()
                };
                (BodyKind::Ship(ship), None)
            }
        };

        let mut body = Body::new(record.label.clone(), frame, kind)
            .with_pos(record.pos)
            .with_vel(record.vel)
            .with_size(record.radius, record.mass);
        body.orient = record.orient;
        body.sbody_index = sbody_index;
        ids.push(space.add_body(body));
    }

    for (ship, target) in docks {
        let port = *ids.get(target).ok_or_else(|| PersistenceError::corrupt(format!("dock target {} out of range", target)))?;
        if let Some(s) = space.body_mut(ids[ship]).and_then(|b| b.ship_mut()) {
            s.dock_target = Some(port);
        }
    }

    let player = *ids
        .get(doc.player)
        .ok_or_else(|| PersistenceError::corrupt(format!("player index {} out of range", doc.player)))?;
    if space.body(player).and_then(|b| b.ship()).is_none() {
        return Err(PersistenceError::corrupt("player is not a ship"));
    }
    space.update_interp(1.0);

    tracing::info!(system = %path, time = doc.time, bodies = ids.len(), "restored game");
    Ok(Game::from_parts(galaxy, space, Some(player), doc.time, doc.time_accel, physics_hz, detail, None))
}

/// Where save `name` lives inside `save_dir`
pub fn save_path(save_dir: &Path, name: &str) -> PathBuf {
    save_dir.join(name)
}

pub fn write_save(path: &Path, doc: &SaveDocument) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(doc)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::FileNotWritable { path: dir.to_path_buf(), source })?;
    }
    fs::write(path, text).map_err(|source| PersistenceError::FileNotWritable { path: path.to_path_buf(), source })?;
    tracing::info!(path = %path.display(), "game saved");
    Ok(())
}

pub fn read_save(path: &Path) -> Result<SaveDocument, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|source| PersistenceError::FileNotOpenable { path: path.to_path_buf(), source })?;
    parse_save(&text)
}

/// Parse a save document, checking the version before anything else
pub fn parse_save(text: &str) -> Result<SaveDocument, PersistenceError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| PersistenceError::corrupt("missing version"))?;
    if version != SAVE_VERSION as u64 {
        return Err(PersistenceError::WrongVersion { found: version as u32, expected: SAVE_VERSION });
    }
    Ok(serde_json::from_value(value)?)
}

/// Whether `path` holds a save this build can load
pub fn can_load(path: &Path) -> bool {
    match read_save(path) {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "save not loadable");
            false
        }
    }
}
