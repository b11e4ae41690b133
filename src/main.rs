use std::process::ExitCode;
use std::time::Duration;

use starframe::{
    config::GameConfig,
    controller::{FrameLoopContext, FrameOutcome, GameSessionController, SystemClock},
    logging,
    model::{Galaxy, SystemPath},
    view::{Camera, RenderOrchestrator, TracingRenderer},
};

/// Frames to run when no count is given
const DEFAULT_FRAMES: u32 = 600;
const FRAME_SLEEP: Duration = Duration::from_millis(16);

/// First dockable body of the first system at the origin
fn default_start(galaxy: &Galaxy) -> Option<SystemPath> {
    let system = galaxy.star_system(&SystemPath::system(0, 0, 0, 0))?;
    let port = system.bodies().iter().find(|b| b.is_dockable())?;
    system.path_for(port.index)
}

fn main() -> ExitCode {
    logging::init();

    let config = match GameConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "bad configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut args = std::env::args().skip(1);
    let galaxy = Galaxy::default();
    let start = match args.next() {
        Some(text) => match text.parse::<SystemPath>() {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::error!(%err, "invalid start path");
                return ExitCode::FAILURE;
            }
        },
        None => default_start(&galaxy),
    };
    let Some(start) = start else {
        tracing::error!("no start location available");
        return ExitCode::FAILURE;
    };
    let frames = args.next().and_then(|n| n.parse().ok()).unwrap_or(DEFAULT_FRAMES);

    let session = GameSessionController::new(config, galaxy);
    let mut app = FrameLoopContext::new(
        session,
        SystemClock::new(),
        RenderOrchestrator::new(Camera::new(1280, 720)),
        TracingRenderer::default(),
    );

    if let Err(err) = app.session.start_game(&start, 0.0) {
        tracing::error!(%err, "could not start game");
        return ExitCode::FAILURE;
    }
    app.reset_timing();

    for _ in 0..frames {
        match app.run_frame() {
            FrameOutcome::Ran => {}
            FrameOutcome::GameEnded | FrameOutcome::Idle | FrameOutcome::Quit => break,
        }
        for event in app.session.take_events() {
            tracing::info!(?event, "game event");
        }
        std::thread::sleep(FRAME_SLEEP);
    }

    if app.session.has_game() {
        match app.session.save_game("quicksave") {
            Ok(path) => tracing::info!(path = %path.display(), "saved"),
            Err(err) => tracing::warn!(%err, "could not save"),
        }
        app.session.request_end_game();
        app.run_frame();
    }
    for event in app.session.take_events() {
        tracing::info!(?event, "game event");
    }
    ExitCode::SUCCESS
}
