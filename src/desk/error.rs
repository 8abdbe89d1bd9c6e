//! Desk error types.

/// Desk error type.
#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("desk is already running")]
    AlreadyRunning,
}
