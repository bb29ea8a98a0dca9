//! Error taxonomy and the crate-wide [`Result`] alias.

use thiserror::Error;
use tracing::error;

use crate::gestalt::LifecycleState;
use crate::store::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GestaltError>;

/// Errors surfaced by the gestalt graph engine.
///
/// The taxonomy keeps "not ready" (lifecycle), "not found", and
/// "underlying storage failure" apart so callers can react to each
/// without string matching. `Corruption` signals a violated internal
/// invariant and is not recoverable.
#[derive(Debug, Error)]
pub enum GestaltError {
    /// Operation invoked while the engine is not in the required
    /// lifecycle state.
    #[error("engine is {actual:?}, expected {expected:?}")]
    Lifecycle {
        /// State the operation requires.
        expected: LifecycleState,
        /// State the engine was actually in.
        actual: LifecycleState,
    },
    /// A referenced vertex, anchor, or permission does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Operation rejected before touching the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A vertex key failed to encode or decode.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A traversal grew past the configured component size limit.
    #[error("gestalt exceeds configured limit of {0} vertices")]
    LimitExceeded(usize),
    /// Failure propagated unchanged from the underlying store.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    /// A stored value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// An internal invariant does not hold; signals a latent bug.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl From<serde_json::Error> for GestaltError {
    fn from(err: serde_json::Error) -> Self {
        GestaltError::Serialization(err.to_string())
    }
}

/// Builds a `Corruption` error, logging it at error level first.
pub(crate) fn corruption(msg: impl Into<String>) -> GestaltError {
    let msg = msg.into();
    error!(detail = %msg, "graph invariant violated");
    GestaltError::Corruption(msg)
}
