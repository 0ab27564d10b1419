//! Error types for the match simulation.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for simulation and snapshot failures.
#[derive(Debug, Error)]
pub enum GameError {
    /// Invalid unit identifier.
    #[error("Invalid unit ID: {0}")]
    InvalidUnitId(u32),

    /// Invalid building identifier.
    #[error("Invalid building ID: {0}")]
    InvalidBuildingId(u32),

    /// A snapshot could not be turned back into an engine.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// Snapshot (de)serialization failed.
    #[error("Snapshot encoding failed: {0}")]
    SnapshotEncoding(#[from] serde_json::Error),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),
}
