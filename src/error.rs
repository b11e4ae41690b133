//! Error taxonomy surfaced at the session boundary.
//!
//! Terrain and frame-graph code never returns these directly; the session
//! controller translates whatever goes wrong below it into one of the kinds
//! here before it reaches the scripting/UI layer.

use std::path::PathBuf;

use thiserror::Error;

/// Starting a new game failed. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartupError {
    #[error("can't start a new game while a game is already running")]
    GameAlreadyRunning,
    #[error("invalid starting location for game: {0}")]
    InvalidStartLocation(String),
}

/// Reading or writing a saved game failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("saved game is corrupt: {0}")]
    CorruptSave(String),
    #[error("saved game has version {found}, expected {expected}")]
    WrongVersion { found: u32, expected: u32 },
    #[error("could not open {path}: {source}")]
    FileNotOpenable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    FileNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PersistenceError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        PersistenceError::CorruptSave(reason.into())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::CorruptSave(err.to_string())
    }
}

/// A save precondition was not met. The session keeps running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveGuardError {
    #[error("can't save while in hyperspace")]
    InHyperspace,
    #[error("can't save when the player is dead")]
    PlayerDead,
}

/// Everything the session controller reports to its callers.
#[derive(Debug, Error)]
pub enum GameError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    SaveGuard(#[from] SaveGuardError),
    #[error("no game is running")]
    NoGameRunning,
}

/// Loading the game configuration failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}
