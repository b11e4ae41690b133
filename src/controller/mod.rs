// CONTROLLER: Session lifecycle, input, and the frame loop
pub mod accumulator;
pub mod clock;
pub mod frame_loop;
pub mod input;
pub mod session;

pub use accumulator::{FixedStepAccumulator, FixedStepTarget, StepReport};
pub use clock::{FrameClock, ManualClock, SystemClock, TimeSource};
pub use frame_loop::{FrameLoopContext, FrameOutcome, FrameStats};
pub use input::{InputEvent, InputProcessor, InputState, KeyBindings};
pub use session::{GameSessionController, SessionState};
