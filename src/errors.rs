//! Error taxonomy for the DeBot engine.
//!
//! Every fallible engine operation returns [`DebotResult<T>`]. Each variant
//! maps to a stable numeric code (801–812) so hosts that expose the engine
//! over a wire boundary can report errors without string matching.

use thiserror::Error;

/// The unified error type for the DeBot engine.
#[derive(Debug, Error)]
pub enum DebotError {
    /// The DeBot could not be initialized or its entry context could not be
    /// driven (bad contract data, failing metadata get-methods).
    #[error("debot start failed: {0}")]
    StartFailed(String),

    /// The DeBot's code, data, or metadata could not be fetched.
    #[error("debot fetch failed: {0}")]
    FetchFailed(String),

    /// An action's effect failed while running, or an `instant` chain
    /// exceeded the configured step ceiling.
    #[error("debot execution failed: {0}")]
    ExecutionFailed(String),

    /// The handle does not reference a live resource. Handles are never
    /// reused, so this is the deterministic outcome of use-after-remove.
    #[error("invalid debot handle: {0}")]
    InvalidHandle(u32),

    /// Malformed action attributes, payloads, or argument JSON.
    #[error("invalid json params: {0}")]
    InvalidJsonParams(String),

    /// The action or method is not part of the instance's current surface.
    #[error("invalid function id: {0}")]
    InvalidFunctionId(String),

    /// The contract ABI could not be parsed.
    #[error("invalid debot ABI: {0}")]
    InvalidAbi(String),

    /// A get-method call on the contract failed.
    #[error("get-method call failed: {0}")]
    GetMethodFailed(String),

    /// An inbound message could not be decoded or is not addressed to an
    /// interface this DeBot declares.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Emulating or dispatching an external message failed.
    #[error("external call failed: {0}")]
    ExternalCallFailed(String),

    /// The browser collaborator errored, disconnected, or missed the
    /// configured reply deadline. The instance stays in its last stable
    /// state so the operation may be retried.
    #[error("browser callback failed: {0}")]
    BrowserCallbackFailed(String),

    /// The browser declined an approval request. Scoped to the one action;
    /// sibling actions remain executable.
    #[error("operation rejected by user")]
    OperationRejected,
}

impl DebotError {
    /// Stable numeric code for this error kind.
    pub fn code(&self) -> u32 {
        match self {
            DebotError::StartFailed(_) => 801,
            DebotError::FetchFailed(_) => 802,
            DebotError::ExecutionFailed(_) => 803,
            DebotError::InvalidHandle(_) => 804,
            DebotError::InvalidJsonParams(_) => 805,
            DebotError::InvalidFunctionId(_) => 806,
            DebotError::InvalidAbi(_) => 807,
            DebotError::GetMethodFailed(_) => 808,
            DebotError::InvalidMessage(_) => 809,
            DebotError::ExternalCallFailed(_) => 810,
            DebotError::BrowserCallbackFailed(_) => 811,
            DebotError::OperationRejected => 812,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type DebotResult<T> = Result<T, DebotError>;
