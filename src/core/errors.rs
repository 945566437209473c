/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronizer errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Interrupted while waiting")]
    #[diagnostic(
        code(sync::interrupted),
        help("Another thread interrupted this waiter. The interrupt flag has been consumed.")
    )]
    Interrupted,

    #[error("Illegal monitor state: {0}")]
    #[diagnostic(
        code(sync::illegal_monitor_state),
        help("Release, signal and wait require the calling thread to hold the lock.")
    )]
    IllegalMonitorState(String),

    #[error("Operation not supported: {0}")]
    #[diagnostic(
        code(sync::unsupported),
        help("The primitive's policy does not implement this acquisition mode.")
    )]
    Unsupported(String),

    #[error("Timed out after {0:?}")]
    #[diagnostic(
        code(sync::timeout),
        help("The wait deadline elapsed before the operation could complete.")
    )]
    Timeout(Duration),

    #[error("Barrier is broken")]
    #[diagnostic(
        code(sync::broken_barrier),
        help("A party was interrupted, timed out, or the barrier was reset. Call reset() to reuse it.")
    )]
    BrokenBarrier,

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(sync::invalid_argument))]
    InvalidArgument(String),

    #[error("Count overflow: {0}")]
    #[diagnostic(
        code(sync::overflow),
        help("Hold or permit count exceeded the capacity of the state word.")
    )]
    Overflow(String),
}

impl SyncError {
    pub(crate) fn not_owner() -> Self {
        SyncError::IllegalMonitorState("current thread is not the owner".to_string())
    }

    pub(crate) fn unsupported(op: &str) -> Self {
        SyncError::Unsupported(op.to_string())
    }

    /// Whether this error came from an interrupt
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted)
    }
}
