//! Communication manager error types.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::binding::BindingError;
use crate::event::ValidationError;

/// Failure modes of the communication manager's public API.
///
/// Transport-level faults are never surfaced here; they show up on the
/// communication state observable and in per-publication callbacks.
#[derive(Debug, Error)]
pub enum CommunicationError {
    /// Event validation failed before any I/O occurred.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The binding rejected an operation.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A response observable was subscribed more than once over its
    /// lifetime.
    #[error("response stream already consumed; responses cannot be re-subscribed")]
    AlreadyConsumed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_convert() {
        let error: CommunicationError =
            ValidationError::InvalidChannelId("a/b".to_string()).into();
        assert!(matches!(error, CommunicationError::Validation(_)));
    }

    #[test]
    fn test_already_consumed_display() {
        assert!(CommunicationError::AlreadyConsumed
            .to_string()
            .contains("already consumed"));
    }
}
