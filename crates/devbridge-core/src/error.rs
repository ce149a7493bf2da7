//! Driver errors.

use crate::transport::TransportError;

/// Boxed error returned by model and device implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`crate::Driver`] lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The transport refused to start
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The model failed to start
    #[error("model failed to start: {0}")]
    ModelStart(#[source] BoxError),
    /// The dispatch thread could not be spawned
    #[error("cannot spawn driver thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The dispatch thread could not build its runtime
    #[error("cannot build driver runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The dispatch thread panicked and took the driver state with it
    #[error("driver state lost after dispatch thread panic")]
    WorkerLost,
    /// The loop dropped a callback before running it
    #[error("driver loop stopped before the callback ran")]
    Stopped,
}
