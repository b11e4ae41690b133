// MODEL: Simulation state
pub mod body;
pub mod frame;
pub mod galaxy;
pub mod game;
pub mod orbit;
pub mod save;
pub mod space;
pub mod system_path;
pub mod terrain;

pub use body::{Body, BodyId, BodyKind, FlightState, Ship};
pub use frame::{Frame, FrameGraph, FrameId};
pub use galaxy::{Galaxy, StarSystem, SystemBody};
pub use game::{Game, GameEvent, TimeAccel};
pub use space::Space;
pub use system_path::SystemPath;
pub use terrain::{DetailLevel, TerrainBody};
