//! Validation errors raised by event constructors before any I/O occurs.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Envelope construction failed.
///
/// Raised synchronously at the public API; no partially constructed
/// event ever reaches the binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An object type contains characters excluded by the topic grammar's
    /// filter charset.
    #[error("invalid object type: {0:?}")]
    InvalidObjectType(String),

    /// A channel identifier contains characters excluded by the topic
    /// grammar's filter charset.
    #[error("invalid channel identifier: {0:?}")]
    InvalidChannelId(String),

    /// A call operation name contains characters excluded by the topic
    /// grammar's filter charset.
    #[error("invalid operation name: {0:?}")]
    InvalidOperationName(String),

    /// An IO context name contains characters excluded by the topic
    /// grammar's filter charset.
    #[error("invalid IO context name: {0:?}")]
    InvalidContextName(String),

    /// A raw publication topic is empty, oversized, or contains wildcard
    /// or null characters.
    #[error("invalid publication topic: {0:?}")]
    InvalidTopic(String),

    /// A raw subscription topic filter is malformed.
    #[error("invalid topic filter: {0:?}")]
    InvalidTopicFilter(String),

    /// A request event does not carry the required discriminator set.
    #[error("invalid event data: {0}")]
    MissingDiscriminator(&'static str),

    /// A response event payload is empty where content is required.
    #[error("invalid response data: {0}")]
    EmptyResponse(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let error = ValidationError::InvalidObjectType("a/b".to_string());
        assert!(error.to_string().contains("a/b"));

        let error = ValidationError::MissingDiscriminator("expected exactly one discriminator");
        assert!(error.to_string().contains("discriminator"));
    }
}
