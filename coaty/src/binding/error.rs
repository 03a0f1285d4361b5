//! Binding error types.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Failure modes of a communication binding.
///
/// Transport-level faults never surface here; they are logged, the
/// communication state transitions to Offline, and the binding retries on
/// reconnect. These errors cover misuse of the binding surface and
/// irrecoverable local conditions.
#[derive(Debug, Clone, Error)]
pub enum BindingError {
    /// An operation that requires a joined binding was invoked before
    /// `join` or after `unjoin`.
    #[error("binding is not joined")]
    NotJoined,

    /// `join` was invoked on an already joined binding.
    #[error("binding is already joined")]
    AlreadyJoined,

    /// The configured broker options are unusable.
    #[error("invalid binding options: {0}")]
    InvalidOptions(String),

    /// An outbound payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// The binding's driver task has terminated; the binding is unusable.
    #[error("binding driver has terminated")]
    DriverGone,
}
