//! The single running game: time, time acceleration, the player and the
//! current space.

use serde::{Deserialize, Serialize};

use super::body::{BodyId, BodyKind, FlightState, Ship, ShipEvent};
use super::galaxy::Galaxy;
use super::space::Space;
use super::system_path::SystemPath;
use super::terrain::DetailLevel;
use crate::error::{SaveGuardError, StartupError};

/// Player ships emerge this many radii above the first terrain body
const HYPERSPACE_EXIT_ALTITUDE: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeAccel {
    Paused,
    #[default]
    X1,
    X10,
    X100,
    X1000,
    X10000,
}

impl TimeAccel {
    pub const ALL: [TimeAccel; 6] = [
        TimeAccel::Paused,
        TimeAccel::X1,
        TimeAccel::X10,
        TimeAccel::X100,
        TimeAccel::X1000,
        TimeAccel::X10000,
    ];

    pub fn rate(&self) -> f64 {
        match self {
            TimeAccel::Paused => 0.0,
            TimeAccel::X1 => 1.0,
            TimeAccel::X10 => 10.0,
            TimeAccel::X100 => 100.0,
            TimeAccel::X1000 => 1000.0,
            TimeAccel::X10000 => 10000.0,
        }
    }
}

/// Notifications for the scripting layer
#[derive(Clone, Debug, PartialEq)]
pub enum GameEvent {
    GameStart,
    GameEnd,
    PlayerDocked(BodyId),
    PlayerUndocked(BodyId),
    PlayerLanded(BodyId),
    EnteredHyperspace(SystemPath),
    LeftHyperspace(SystemPath),
    PlayerDied,
}

/// A jump in progress. The player ship is held here, outside any space.
#[derive(Debug)]
pub struct HyperspaceTrip {
    pub target: SystemPath,
    pub end_time: f64,
    pub ship: Ship,
}

pub struct Game {
    galaxy: Galaxy,
    space: Space,
    player: Option<BodyId>,
    time: f64,
    time_accel: TimeAccel,
    requested_accel: TimeAccel,
    physics_hz: f64,
    detail: DetailLevel,
    hyperspace: Option<HyperspaceTrip>,
    /// Bumped whenever `space` is replaced
    space_epoch: u64,
    death_time: Option<f64>,
    events: Vec<GameEvent>,
}

impl Game {
    /// Start a new game at `path`, which must name a starport (the player
    /// starts docked) or a terrain body (the player starts in orbit).
    pub fn new(galaxy: Galaxy, path: &SystemPath, start_time: f64, physics_hz: f64, detail: DetailLevel) -> Result<Self, StartupError> {
        let invalid = || StartupError::InvalidStartLocation(path.to_string());
        if !path.is_body_path() {
            return Err(invalid());
        }
        let system = galaxy.star_system(path).ok_or_else(invalid)?;
        let sbody = path.body_index().and_then(|i| system.system_body_by_index(i)).cloned().ok_or_else(invalid)?;
        if !sbody.is_dockable() && !sbody.is_orbitable() {
            return Err(invalid());
        }

        let mut space = Space::new(system, start_time, detail);
        let target = space.body_for_sbody(sbody.index).ok_or_else(invalid)?;
        let player = if sbody.is_dockable() {
            space.spawn_docked(target, "player")
        } else {
            space.spawn_in_orbit(target, 0.5, "player")
        }
        .ok_or_else(invalid)?;
        space.update_interp(1.0);

        tracing::info!(%path, start_time, "new game");
        Ok(Self::from_parts(galaxy, space, Some(player), start_time, TimeAccel::X1, physics_hz, detail, None))
    }

    /// Reassemble a game from restored state
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        galaxy: Galaxy,
        space: Space,
        player: Option<BodyId>,
        time: f64,
        time_accel: TimeAccel,
        physics_hz: f64,
        detail: DetailLevel,
        hyperspace: Option<HyperspaceTrip>,
    ) -> Self {
        Self {
            galaxy,
            space,
            player,
            time,
            time_accel,
            requested_accel: time_accel,
            physics_hz: if physics_hz > 0.0 { physics_hz } else { 60.0 },
            detail,
            hyperspace,
            space_epoch: 0,
            death_time: None,
            events: Vec::new(),
        }
    }

    pub fn galaxy(&self) -> &Galaxy {
        &self.galaxy
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut Space {
        &mut self.space
    }

    /// Player body, `None` while in hyperspace
    pub fn player(&self) -> Option<BodyId> {
        self.player
    }

    pub fn player_ship(&self) -> Option<&Ship> {
        match &self.hyperspace {
            Some(trip) => Some(&trip.ship),
            None => self.space.body(self.player?)?.ship(),
        }
    }

    pub fn system_path(&self) -> SystemPath {
        self.space.system().path
    }

    /// Changes every time the space is replaced, e.g. on leaving hyperspace
    pub fn space_epoch(&self) -> u64 {
        self.space_epoch
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn detail(&self) -> DetailLevel {
        self.detail
    }

    pub fn hyperspace(&self) -> Option<&HyperspaceTrip> {
        self.hyperspace.as_ref()
    }

    pub fn is_hyperspace(&self) -> bool {
        self.hyperspace.is_some()
    }

    pub fn is_player_dead(&self) -> bool {
        self.player_ship().is_some_and(|s| s.is_dead())
    }

    /// Game time at which the player died
    pub fn death_time(&self) -> Option<f64> {
        self.death_time
    }

    pub fn time_accel(&self) -> TimeAccel {
        self.time_accel
    }

    pub fn requested_time_accel(&self) -> TimeAccel {
        self.requested_accel
    }

    pub fn is_paused(&self) -> bool {
        self.time_accel == TimeAccel::Paused
    }

    /// Size of one physics step in game seconds; 0 while paused
    pub fn time_step(&self) -> f64 {
        self.time_accel.rate() / self.physics_hz
    }

    pub fn request_time_accel(&mut self, accel: TimeAccel) {
        self.requested_accel = accel;
    }

    /// Highest acceleration the player's situation allows
    fn accel_cap(&self) -> TimeAccel {
        let docking = self
            .player_ship()
            .is_some_and(|s| matches!(s.flight_state, FlightState::Docking | FlightState::Undocking));
        if docking {
            TimeAccel::X1
        } else {
            TimeAccel::X10000
        }
    }

    /// Apply the requested acceleration. Returns true when the level changed.
    pub fn update_time_accel(&mut self) -> bool {
        let wanted = self.requested_accel.min(self.accel_cap());
        if wanted == self.time_accel {
            return false;
        }
        tracing::debug!(from = ?self.time_accel, to = ?wanted, "time acceleration changed");
        self.time_accel = wanted;
        true
    }

    fn force_real_time(&mut self) {
        if self.time_accel > TimeAccel::X1 {
            self.time_accel = TimeAccel::X1;
        }
        if self.requested_accel > TimeAccel::X1 {
            self.requested_accel = TimeAccel::X1;
        }
    }

    /// Whether render interpolation should be pinned to the latest step
    pub fn is_dock_transition(&self) -> bool {
        self.player_ship().is_some_and(|s| s.flight_state.is_dock_transition())
    }

    /// One physics step of `step` game seconds
    pub fn step(&mut self, step: f64) {
        self.time += step;
        let events = self.space.time_step(step, self.time);
        for (body, event) in events {
            if Some(body) != self.player {
                continue;
            }
            match event {
                ShipEvent::Docked(port) => {
                    self.force_real_time();
                    self.events.push(GameEvent::PlayerDocked(port));
                }
                ShipEvent::Undocked(port) => {
                    self.force_real_time();
                    self.events.push(GameEvent::PlayerUndocked(port));
                }
                ShipEvent::Landed(planet) => {
                    self.force_real_time();
                    self.events.push(GameEvent::PlayerLanded(planet));
                }
                ShipEvent::Died => {
                    self.force_real_time();
                    self.death_time = Some(self.time);
                    self.events.push(GameEvent::PlayerDied);
                }
            }
        }

        if self.hyperspace.as_ref().is_some_and(|trip| self.time >= trip.end_time) {
            self.leave_hyperspace();
        }
    }

    pub fn request_dock(&mut self) -> Option<BodyId> {
        let port = self.space.request_dock(self.player?)?;
        self.force_real_time();
        Some(port)
    }

    pub fn request_undock(&mut self) -> bool {
        let undocking = self.player.is_some_and(|p| self.space.request_undock(p));
        if undocking {
            self.force_real_time();
        }
        undocking
    }

    /// Jump to `target`, arriving `duration` game seconds from now
    pub fn begin_hyperspace(&mut self, target: SystemPath, duration: f64) -> Result<(), StartupError> {
        if self.hyperspace.is_some() {
            return Ok(());
        }
        if self.galaxy.star_system(&target).is_none() {
            return Err(StartupError::InvalidStartLocation(target.to_string()));
        }
        let Some(player) = self.player.take() else {
            return Ok(());
        };
        let Some(body) = self.space.remove_body(player) else {
            return Ok(());
        };
        let BodyKind::Ship(mut ship) = body.kind else {
            return Ok(());
        };
        ship.flight_state = FlightState::Hyperspace;
        ship.dock_target = None;
        tracing::info!(%target, duration, "entering hyperspace");
        self.hyperspace = Some(HyperspaceTrip { target, end_time: self.time + duration.max(0.0), ship });
        self.events.push(GameEvent::EnteredHyperspace(target));
        Ok(())
    }

    fn leave_hyperspace(&mut self) {
        let Some(trip) = self.hyperspace.take() else { return };
        let Some(system) = self.galaxy.star_system(&trip.target) else {
            tracing::error!(target = %trip.target, "hyperspace target vanished");
            return;
        };
        self.space = Space::new(system, self.time, self.detail);
        self.space_epoch += 1;

        let planet = self.space.bodies().find(|(_, b)| b.terrain().is_some()).map(|(id, _)| id);
        let arrival = planet.and_then(|p| self.space.spawn_in_orbit(p, HYPERSPACE_EXIT_ALTITUDE, "player"));
        if let Some(id) = arrival {
            if let Some(ship) = self.space.body_mut(id).and_then(|b| b.ship_mut()) {
                *ship = Ship { flight_state: FlightState::Flying, dock_target: None, ..trip.ship };
            }
        }
        self.player = arrival;
        self.space.update_interp(1.0);
        tracing::info!(system = %trip.target, "left hyperspace");
        self.events.push(GameEvent::LeftHyperspace(trip.target));
    }

    pub fn on_change_detail_level(&mut self, detail: DetailLevel) {
        if detail != self.detail {
            self.detail = detail;
            self.space.on_change_detail_level(detail);
        }
    }

    /// Saving is only possible in normal space with a living player
    pub fn save_guard(&self) -> Result<(), SaveGuardError> {
        if self.is_hyperspace() {
            return Err(SaveGuardError::InHyperspace);
        }
        if self.is_player_dead() {
            return Err(SaveGuardError::PlayerDead);
        }
        Ok(())
    }

    pub fn push_event(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::galaxy::BodyType;

    fn start_path(galaxy: &Galaxy, kind: BodyType) -> SystemPath {
        let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let body = system.bodies().iter().find(|b| b.body_type == kind).unwrap();
        system.path_for(body.index).unwrap()
    }

    fn docked_game() -> Game {
        let galaxy = Galaxy::new(0);
        let path = start_path(&galaxy, BodyType::StarportOrbital);
        Game::new(galaxy, &path, 0.0, 60.0, DetailLevel::VeryLow).unwrap()
    }

    #[test]
    fn test_start_docked() {
        let game = docked_game();
        assert_eq!(game.player_ship().unwrap().flight_state, FlightState::Docked);
        assert!(game.is_dock_transition());
        assert_eq!(game.time_step(), 1.0 / 60.0);
    }

    #[test]
    fn test_invalid_start_locations() {
        let galaxy = Galaxy::new(0);
        let star = start_path(&galaxy, BodyType::Star);
        assert!(matches!(Game::new(galaxy.clone(), &star, 0.0, 60.0, DetailLevel::Low), Err(StartupError::InvalidStartLocation(_))));
        let sector = SystemPath::sector(0, 0, 0);
        assert!(Game::new(galaxy.clone(), &sector, 0.0, 60.0, DetailLevel::Low).is_err());
        let missing = SystemPath::body(0, 0, 0, 0, 999);
        assert!(Game::new(galaxy, &missing, 0.0, 60.0, DetailLevel::Low).is_err());
    }

    #[test]
    fn test_time_accel_levels() {
        let galaxy = Galaxy::new(0);
        let path = start_path(&galaxy, BodyType::RockyPlanet);
        let mut game = Game::new(galaxy, &path, 0.0, 60.0, DetailLevel::VeryLow).unwrap();

        game.request_time_accel(TimeAccel::X100);
        assert!(game.update_time_accel());
        assert!(!game.update_time_accel());
        assert_eq!(game.time_step(), 100.0 / 60.0);

        game.request_time_accel(TimeAccel::Paused);
        assert!(game.update_time_accel());
        assert!(game.is_paused());
        assert_eq!(game.time_step(), 0.0);
    }

    #[test]
    fn test_undocking_caps_accel() {
        let mut game = docked_game();
        assert!(game.request_undock());
        game.request_time_accel(TimeAccel::X1000);
        game.update_time_accel();
        assert_eq!(game.time_accel(), TimeAccel::X1);
    }

    #[test]
    fn test_save_guard() {
        let mut game = docked_game();
        assert_eq!(game.save_guard(), Ok(()));

        let target = SystemPath::system(0, 0, 0, 0);
        game.begin_hyperspace(target, 5.0).unwrap();
        assert_eq!(game.save_guard(), Err(SaveGuardError::InHyperspace));
        assert!(game.player().is_none());

        for _ in 0..400 {
            game.step(1.0 / 60.0);
        }
        assert!(!game.is_hyperspace());
        assert!(game.player().is_some());
        let events = game.take_events();
        assert_eq!(events, vec![GameEvent::EnteredHyperspace(target), GameEvent::LeftHyperspace(target)]);

        let player = game.player().unwrap();
        game.space_mut().body_mut(player).unwrap().ship_mut().unwrap().hull = 0.0;
        assert_eq!(game.save_guard(), Err(SaveGuardError::PlayerDead));
    }

    #[test]
    fn test_dock_events_force_real_time() {
        let mut game = docked_game();
        game.request_undock();
        let mut t = 0.0;
        while t < 12.0 {
            game.step(0.1);
            t += 0.1;
        }
        assert!(matches!(game.take_events().as_slice(), [GameEvent::PlayerUndocked(_)]));

        game.request_time_accel(TimeAccel::X1000);
        assert!(game.update_time_accel());
        assert!(game.request_dock().is_some());
        assert_eq!(game.time_accel(), TimeAccel::X1);
    }

    #[test]
    fn test_death_forces_real_time() {
        let galaxy = Galaxy::new(0);
        let path = start_path(&galaxy, BodyType::RockyPlanet);
        let mut game = Game::new(galaxy, &path, 0.0, 60.0, DetailLevel::VeryLow).unwrap();
        game.request_time_accel(TimeAccel::X1000);
        assert!(game.update_time_accel());

        let player = game.player().unwrap();
        let body = game.space_mut().body_mut(player).unwrap();
        body.vel = -body.pos.normalize() * 5000.0;

        for _ in 0..2000 {
            game.step(game.time_step());
            if game.is_player_dead() {
                break;
            }
        }
        assert!(game.take_events().contains(&GameEvent::PlayerDied));
        assert_eq!(game.time_accel(), TimeAccel::X1);
        assert_eq!(game.requested_time_accel(), TimeAccel::X1);
    }

    #[test]
    fn test_patches_from_replaced_space_are_dropped() {
        let galaxy = Galaxy::new(0);
        let path = start_path(&galaxy, BodyType::RockyPlanet);
        let mut game = Game::new(galaxy, &path, 0.0, 60.0, DetailLevel::VeryLow).unwrap();
        assert_eq!(game.space_epoch(), 0);

        let camera = game.space().body(game.player().unwrap()).unwrap().interp_pos();
        let token = crate::jobs::CancelToken::new();
        let built: Vec<_> = game
            .space_mut()
            .update_lod(camera, 64)
            .into_iter()
            .map(|(id, req)| (id, req.build(&token).unwrap()))
            .collect();
        assert!(!built.is_empty());

        // jump back into the same system: same bodies, same ids, new space
        game.begin_hyperspace(path.system_only().unwrap(), 1.0).unwrap();
        while game.is_hyperspace() {
            game.step(1.0 / 60.0);
        }
        assert_eq!(game.space_epoch(), 1);
        let camera = game.space().body(game.player().unwrap()).unwrap().interp_pos();
        assert!(!game.space_mut().update_lod(camera, 64).is_empty());

        for (id, mesh) in built {
            assert!(game.space().body(id).is_some_and(|b| b.terrain().is_some()));
            assert!(!game.space_mut().merge_patch(id, mesh));
        }
        let ready: usize = game.space().bodies().filter_map(|(_, b)| b.terrain()).map(|t| t.patches().ready_count()).sum();
        assert_eq!(ready, 0);
    }
}
