//! Operating state of the communication manager.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Lifecycle state of a communication manager.
///
/// # State Transitions
///
/// ```text
/// Initial -> Starting -> Joined -> Stopping -> Stopped
///                            ^                    |
///                            +------ start -------+
/// ```
///
/// `Starting` transitions to `Joined` on the first Online transition of
/// the binding. While not `Joined`, publications are accepted and queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingState {
    /// Manager created, never started.
    #[default]
    Initial,
    /// Start requested; join events not yet published.
    Starting,
    /// Joined the communication infrastructure.
    Joined,
    /// Stop requested; orderly unjoin in progress.
    Stopping,
    /// Fully unjoined.
    Stopped,
}

impl Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "Initial",
            Self::Starting => "Starting",
            Self::Joined => "Joined",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(OperatingState::default(), OperatingState::Initial);
    }

    #[test]
    fn test_display() {
        assert_eq!(OperatingState::Joined.to_string(), "Joined");
        assert_eq!(OperatingState::Stopping.to_string(), "Stopping");
    }
}
