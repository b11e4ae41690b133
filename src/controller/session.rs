//! Lifecycle of the single running game.
//!
//! The controller is the only owner of the `Game`. Everything below it
//! (terrain, frames, saves) reports failures in its own terms; they are
//! translated into `GameError` here before reaching callers.

use std::path::PathBuf;

use glam::DVec3;

use super::input::{InputProcessor, InputState};
use crate::config::GameConfig;
use crate::error::{GameError, StartupError};
use crate::jobs::{AsyncJobQueue, CancelToken, JobFn, JobScope, SyncJobQueue};
use crate::model::body::BodyId;
use crate::model::galaxy::Galaxy;
use crate::model::game::{Game, GameEvent, TimeAccel};
use crate::model::save;
use crate::model::system_path::SystemPath;
use crate::model::terrain::PatchMesh;

/// Name of the save written when a game ends
pub const EXIT_SAVE_NAME: &str = "_exit";

/// Patch requests handed out per frame
const LOD_REQUESTS_PER_FRAME: usize = 32;

/// Output of a terrain patch job: which body it belongs to and the mesh
pub type PatchJobOutput = (BodyId, PatchMesh);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NoGame,
    /// Only exists inside `start_game`/`load_game`, which build the game
    /// before returning, so `state` never reports it
    Starting,
    Running,
    Paused,
    EndingRequested,
}

pub struct GameSessionController {
    config: GameConfig,
    galaxy: Galaxy,
    game: Option<Game>,
    /// `Game::space_epoch` the in-flight terrain jobs were issued for
    terrain_epoch: u64,
    end_requested: bool,
    input: InputState,
    jobs: AsyncJobQueue<PatchJobOutput>,
    sync_jobs: SyncJobQueue<PatchJobOutput>,
    /// Acceleration to return to when unpausing
    resume_accel: TimeAccel,
    events: Vec<GameEvent>,
}

impl GameSessionController {
    pub fn new(config: GameConfig, galaxy: Galaxy) -> Self {
        let jobs = AsyncJobQueue::new(config.worker_count());
        let input = InputState::new(config.enable_joystick);
        Self {
            config,
            galaxy,
            game: None,
            terrain_epoch: 0,
            end_requested: false,
            input,
            jobs,
            sync_jobs: SyncJobQueue::new(),
            resume_accel: TimeAccel::X1,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn galaxy(&self) -> &Galaxy {
        &self.galaxy
    }

    pub fn state(&self) -> SessionState {
        match &self.game {
            None => SessionState::NoGame,
            Some(_) if self.end_requested => SessionState::EndingRequested,
            Some(game) if game.is_paused() => SessionState::Paused,
            Some(_) => SessionState::Running,
        }
    }

    pub fn has_game(&self) -> bool {
        self.game.is_some()
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub fn game_mut(&mut self) -> Option<&mut Game> {
        self.game.as_mut()
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.pending() + self.sync_jobs.pending()
    }

    fn ensure_no_game(&self) -> Result<(), StartupError> {
        if self.game.is_some() {
            tracing::warn!("rejecting game start, a game is already running");
            return Err(StartupError::GameAlreadyRunning);
        }
        Ok(())
    }

    /// Start a new game at `path`
    pub fn start_game(&mut self, path: &SystemPath, start_time: f64) -> Result<(), GameError> {
        self.ensure_no_game()?;
        let built = Game::new(
            self.galaxy.clone(),
            path,
            start_time,
            self.config.physics_hz,
            self.config.detail_planets,
        );
        match built {
            Ok(game) => {
                self.begin(game);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%path, %err, "could not start game");
                Err(err.into())
            }
        }
    }

    /// Load the save called `name` from the save directory
    pub fn load_game(&mut self, name: &str) -> Result<(), GameError> {
        self.ensure_no_game()?;
        let path = save::save_path(&self.config.save_dir, name);
        let loaded = save::read_save(&path)
            .and_then(|doc| save::restore(doc, self.config.physics_hz, self.config.detail_planets));
        match loaded {
            Ok(game) => {
                self.galaxy = game.galaxy().clone();
                self.begin(game);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "could not load game");
                Err(err.into())
            }
        }
    }

    pub fn can_load_game(&self, name: &str) -> bool {
        save::can_load(&save::save_path(&self.config.save_dir, name))
    }

    fn begin(&mut self, mut game: Game) {
        self.input.reset();
        self.end_requested = false;
        self.resume_accel = TimeAccel::X1;
        self.terrain_epoch = game.space_epoch();
        game.push_event(GameEvent::GameStart);
        tracing::info!(system = %game.system_path(), time = game.time(), "game started");
        self.game = Some(game);
    }

    /// Save the running game as `name`, returning where it was written
    pub fn save_game(&mut self, name: &str) -> Result<PathBuf, GameError> {
        let game = self.game.as_ref().ok_or(GameError::NoGameRunning)?;
        if let Err(err) = game.save_guard() {
            tracing::warn!(%err, "save refused");
            return Err(err.into());
        }
        let doc = save::snapshot(game)?;
        let path = save::save_path(&self.config.save_dir, name);
        save::write_save(&path, &doc)?;
        Ok(path)
    }

    /// Ask for the game to end at the next safe point in the frame
    pub fn request_end_game(&mut self) {
        if self.game.is_some() && !self.end_requested {
            tracing::info!("end of game requested");
            self.end_requested = true;
        }
    }

    pub fn end_requested(&self) -> bool {
        self.end_requested
    }

    /// Tear the game down if an end was requested. Returns true if it was.
    pub fn process_end_request(&mut self) -> bool {
        if !self.end_requested {
            return false;
        }
        self.end_game();
        true
    }

    /// Tear down the running game now. Pending session jobs are cancelled
    /// and an exit save is attempted if configured.
    pub fn end_game(&mut self) {
        if self.game.is_none() {
            self.end_requested = false;
            return;
        }

        let cancelled = self.jobs.cancel_scope(JobScope::Session) + self.sync_jobs.cancel_scope(JobScope::Session);
        tracing::debug!(cancelled, "cancelled session jobs");

        if self.config.autosave_on_exit {
            match self.save_game(EXIT_SAVE_NAME) {
                Ok(path) => tracing::info!(path = %path.display(), "exit save written"),
                Err(err) => tracing::warn!(%err, "exit save skipped"),
            }
        }

        if let Some(mut game) = self.game.take() {
            self.events.extend(game.take_events());
        }
        self.input.reset();
        self.end_requested = false;
        self.events.push(GameEvent::GameEnd);
        tracing::info!("game ended");
    }

    pub fn player(&self) -> Option<BodyId> {
        self.game.as_ref()?.player()
    }

    pub fn system(&self) -> Option<SystemPath> {
        self.game.as_ref().map(|g| g.system_path())
    }

    pub fn time(&self) -> Option<f64> {
        self.game.as_ref().map(|g| g.time())
    }

    /// True while paused, and when no game is running
    pub fn paused(&self) -> bool {
        self.game.as_ref().map_or(true, |g| g.is_paused())
    }

    /// Request a zero timestep, or return to the previous acceleration.
    /// Takes effect on the next time acceleration update.
    pub fn set_paused(&mut self, paused: bool) {
        let Some(game) = self.game.as_mut() else { return };
        if paused {
            if game.requested_time_accel() != TimeAccel::Paused {
                self.resume_accel = game.requested_time_accel();
            }
            game.request_time_accel(TimeAccel::Paused);
        } else if game.requested_time_accel() == TimeAccel::Paused {
            game.request_time_accel(self.resume_accel);
        }
    }

    /// Drain notifications for the scripting layer
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        let mut events = std::mem::take(&mut self.events);
        if let Some(game) = self.game.as_mut() {
            events.extend(game.take_events());
        }
        events
    }

    /// Feed this frame's input snapshot into the game
    pub fn apply_input(&mut self, processor: &InputProcessor) {
        let Some(game) = self.game.as_mut() else { return };

        if let Some(accel) = processor.requested_time_accel(&self.input) {
            game.request_time_accel(accel);
        }
        if processor.wants_dock(&self.input) {
            game.request_dock();
        }
        if processor.wants_undock(&self.input) {
            game.request_undock();
        }

        let controls = processor.ship_controls(&self.input);
        let Some(player) = game.player() else { return };
        if let Some(ship) = game.space_mut().body_mut(player).and_then(|b| b.ship_mut()) {
            ship.controls = controls;
        }
    }

    /// Queue terrain patch builds for a camera at `camera_world` and merge
    /// whatever has finished. Returns the number of patches merged.
    ///
    /// Root patches go to the same-thread queue so a planet is never drawn
    /// with holes; finer patches go to the workers.
    pub fn update_terrain(&mut self, camera_world: DVec3) -> usize {
        let Some(game) = self.game.as_mut() else { return 0 };

        // body ids restart in a replaced space, so nothing in flight is ours
        if game.space_epoch() != self.terrain_epoch {
            let cancelled = self.jobs.cancel_scope(JobScope::Session) + self.sync_jobs.cancel_scope(JobScope::Session);
            tracing::debug!(cancelled, "space replaced, cancelled terrain jobs");
            self.terrain_epoch = game.space_epoch();
        }

        for (body, request) in game.space_mut().update_lod(camera_world, LOD_REQUESTS_PER_FRAME) {
            let is_root = request.key.depth == 0;
            let work: JobFn<PatchJobOutput> = Box::new(move |token: &CancelToken| request.build(token).map(|mesh| (body, mesh)));
            if is_root {
                self.sync_jobs.queue(JobScope::Session, work);
            } else {
                self.jobs.queue(JobScope::Session, work);
            }
        }

        let mut finished = self.jobs.finish_jobs();
        finished.extend(self.sync_jobs.run_jobs(self.config.sync_jobs_per_loop.max(1)));

        let space = game.space_mut();
        let mut merged = 0;
        for (body, mesh) in finished {
            if space.merge_patch(body, mesh) {
                merged += 1;
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(save_dir: &std::path::Path) -> GameSessionController {
        let config = GameConfig {
            worker_threads: 1,
            save_dir: save_dir.to_path_buf(),
            detail_planets: crate::model::terrain::DetailLevel::VeryLow,
            ..GameConfig::default()
        };
        GameSessionController::new(config, Galaxy::new(0))
    }

    fn dockable_path(galaxy: &Galaxy) -> SystemPath {
        let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let port = system.bodies().iter().find(|b| b.is_dockable()).unwrap();
        system.path_for(port.index).unwrap()
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        let path = dockable_path(session.galaxy());
        assert_eq!(session.state(), SessionState::NoGame);

        session.start_game(&path, 0.0).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        let player = session.player();

        let err = session.start_game(&path, 100.0).unwrap_err();
        assert!(matches!(err, GameError::Startup(StartupError::GameAlreadyRunning)));
        assert_eq!(session.player(), player);
        assert_eq!(session.time(), Some(0.0));
    }

    #[test]
    fn test_invalid_start_leaves_no_game() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        let err = session.start_game(&SystemPath::sector(0, 0, 0), 0.0).unwrap_err();
        assert!(matches!(err, GameError::Startup(StartupError::InvalidStartLocation(_))));
        assert_eq!(session.state(), SessionState::NoGame);
        assert!(session.paused());

        assert!(session.load_game("missing").is_err());
        assert_eq!(session.state(), SessionState::NoGame);

        // a failed attempt leaves nothing behind that blocks the next one
        let path = dockable_path(session.galaxy());
        session.start_game(&path, 0.0).unwrap();
        assert_eq!(session.state(), SessionState::Running);
    }

    fn player_position(session: &GameSessionController) -> DVec3 {
        let game = session.game().unwrap();
        game.space().body(game.player().unwrap()).unwrap().interp_pos()
    }

    #[test]
    fn test_jump_drops_terrain_work_for_old_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        let system = session.galaxy().star_system(&SystemPath::system(0, 0, 0, 0)).unwrap();
        let planet = system.bodies().iter().find(|b| b.is_orbitable()).unwrap();
        let path = system.path_for(planet.index).unwrap();
        session.start_game(&path, 0.0).unwrap();

        session.update_terrain(player_position(&session));
        assert!(session.pending_jobs() > 0);

        let game = session.game_mut().unwrap();
        game.begin_hyperspace(path.system_only().unwrap(), 1.0).unwrap();
        while game.is_hyperspace() {
            game.step(1.0 / 60.0);
        }
        assert_eq!(game.space_epoch(), 1);

        let mut merged = 0;
        for _ in 0..50 {
            merged += session.update_terrain(player_position(&session));
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(merged > 0);

        let game = session.game().unwrap();
        for (_, body) in game.space().bodies() {
            let Some(terrain) = body.terrain() else { continue };
            let tree = terrain.patches();
            assert!(tree.visible_patches().iter().all(|p| p.generation == tree.generation()));
        }
    }

    #[test]
    fn test_end_is_deferred_until_processed() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        let path = dockable_path(session.galaxy());
        session.start_game(&path, 0.0).unwrap();
        assert_eq!(session.take_events(), vec![GameEvent::GameStart]);

        session.request_end_game();
        assert_eq!(session.state(), SessionState::EndingRequested);
        assert!(session.has_game());

        assert!(session.process_end_request());
        assert_eq!(session.state(), SessionState::NoGame);
        assert_eq!(session.take_events(), vec![GameEvent::GameEnd]);
        assert!(session.can_load_game(EXIT_SAVE_NAME));
        assert!(!session.process_end_request());
    }

    #[test]
    fn test_pause_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        let path = dockable_path(session.galaxy());
        session.start_game(&path, 0.0).unwrap();

        session.set_paused(true);
        session.game_mut().unwrap().update_time_accel();
        assert_eq!(session.state(), SessionState::Paused);
        assert!(session.paused());

        session.set_paused(false);
        session.game_mut().unwrap().update_time_accel();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.game().unwrap().time_accel(), TimeAccel::X1);
    }

    #[test]
    fn test_save_without_game() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = controller(dir.path());
        assert!(matches!(session.save_game("x"), Err(GameError::NoGameRunning)));
        assert!(!session.can_load_game("x"));
        assert!(matches!(session.load_game("x"), Err(GameError::Persistence(_))));
        assert_eq!(session.state(), SessionState::NoGame);
    }
}
