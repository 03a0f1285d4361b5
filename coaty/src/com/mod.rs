//! Communication subsystem: the public event API, response correlation,
//! and lifecycle sequencing.

pub mod correlation;
pub mod error;
pub mod incoming;
pub mod manager;
pub mod observers;
pub mod state;

pub use correlation::ResponseObservable;
pub use error::CommunicationError;
pub use incoming::{IncomingCall, IncomingDiscover, IncomingQuery, IncomingUpdate};
pub use manager::CommunicationManager;
pub use observers::EventStream;
pub use state::OperatingState;
