use glam::DVec3;

use super::accumulator::FixedStepAccumulator;
use super::clock::{FrameClock, TimeSource};
use super::input::InputProcessor;
use super::session::GameSessionController;
use crate::view::render::{RenderOrchestrator, RenderStats, Renderer};

/// Game seconds between the player's death and the end of the game
pub const DEATH_END_DELAY: f64 = 8.0;

/// Wall seconds between stats log lines
const STATS_INTERVAL: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A game frame was simulated and drawn
    Ran,
    /// The game ended at the end of this frame
    GameEnded,
    /// No game is running
    Idle,
    /// Quit was requested from input
    Quit,
}

/// Accumulated numbers for the periodic stats line
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub physics_steps: u32,
    pub patches_merged: usize,
    pub render: RenderStats,
    pub elapsed: f64,
}

/// The application context: one per process. Owns the session controller
/// and everything the main loop needs to drive it.
pub struct FrameLoopContext<S: TimeSource, R: Renderer> {
    pub session: GameSessionController,
    clock: FrameClock<S>,
    accumulator: FixedStepAccumulator,
    orchestrator: RenderOrchestrator,
    renderer: R,
    input_processor: InputProcessor,
    stats: FrameStats,
    last_report: FrameStats,
}

impl<S: TimeSource, R: Renderer> FrameLoopContext<S, R> {
    pub fn new(session: GameSessionController, source: S, orchestrator: RenderOrchestrator, renderer: R) -> Self {
        let config = session.config();
        let clock = FrameClock::new(source, config.max_frame_time);
        let accumulator = FixedStepAccumulator::new(config.max_physics_cycles_per_render, config.max_frame_time);
        Self {
            session,
            clock,
            accumulator,
            orchestrator,
            renderer,
            input_processor: InputProcessor::default(),
            stats: FrameStats::default(),
            last_report: FrameStats::default(),
        }
    }

    pub fn clock(&self) -> &FrameClock<S> {
        &self.clock
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn orchestrator_mut(&mut self) -> &mut RenderOrchestrator {
        &mut self.orchestrator
    }

    pub fn accumulator(&self) -> &FixedStepAccumulator {
        &self.accumulator
    }

    /// Stats of the last completed reporting interval
    pub fn last_report(&self) -> FrameStats {
        self.last_report
    }

    /// Call after starting or loading a game so the time spent doing so is
    /// not simulated
    pub fn reset_timing(&mut self) {
        self.clock.reset();
        self.accumulator.reset();
    }

    /// Run one frame: input, fixed physics steps, interpolation, terrain
    /// LOD, render, time acceleration, and the deferred end of game.
    pub fn run_frame(&mut self) -> FrameOutcome {
        let frame_time = self.clock.tick();

        if self.session.input().quit_requested {
            return FrameOutcome::Quit;
        }
        if !self.session.has_game() {
            return FrameOutcome::Idle;
        }

        self.session.apply_input(&self.input_processor);

        let Some(game) = self.session.game_mut() else {
            return FrameOutcome::Idle;
        };

        let step = game.time_step();
        let rate = game.time_accel().rate();
        let report = self.accumulator.advance(frame_time, rate, step, game);
        game.space_mut().update_interp(report.alpha);

        let render = self.orchestrator.render(game, &mut self.renderer);

        if game.update_time_accel() {
            self.accumulator.reset();
        }

        if let Some(died_at) = game.death_time() {
            if game.time() - died_at >= DEATH_END_DELAY {
                self.session.request_end_game();
            }
        }

        // terrain jobs are queued after drawing so this frame's camera is used
        let camera: DVec3 = self.orchestrator.camera().position;
        let merged = self.session.update_terrain(camera);

        self.record(frame_time, report.steps, merged, render);

        // safe point: nothing holds a reference into the game any more
        if self.session.process_end_request() {
            self.accumulator.reset();
            return FrameOutcome::GameEnded;
        }
        FrameOutcome::Ran
    }

    fn record(&mut self, frame_time: f64, steps: u32, merged: usize, render: RenderStats) {
        self.stats.frames += 1;
        self.stats.physics_steps += steps;
        self.stats.patches_merged += merged;
        self.stats.render += render;
        self.stats.elapsed += frame_time;

        if self.stats.elapsed >= STATS_INTERVAL {
            let s = self.stats;
            tracing::debug!(
                fps = s.frames as f64 / s.elapsed,
                physics_steps = s.physics_steps,
                draw_calls = s.render.draw_calls,
                patches_drawn = s.render.patches_drawn,
                bodies_culled = s.render.bodies_culled,
                patches_merged = s.patches_merged,
                pending_jobs = self.session.pending_jobs(),
                "frame stats"
            );
            self.last_report = s;
            self.stats = FrameStats::default();
        }
    }
}
