// Re-export all public modules so they can be used from main.rs
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod utils;

// MVC Architecture
pub mod model;
pub mod view;
pub mod controller;

pub use config::GameConfig;
pub use controller::{FrameLoopContext, GameSessionController};
pub use error::GameError;
