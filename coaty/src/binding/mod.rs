//! Communication bindings: the pluggable adapters between the
//! communication manager and concrete messaging brokers.
//!
//! The [`CommunicationBinding`] trait is the contract; the wire codec and
//! inbound dispatch rules shared by all implementations live in
//! [`dispatch`]; [`InProcessBinding`] is a loopback implementation for
//! single-process deployments and tests.

pub mod dispatch;
pub mod error;
pub mod inprocess;
pub mod traits;

pub use error::BindingError;
pub use inprocess::{InProcessBinding, InProcessBroker};
pub use traits::{
    CommunicationBinding, CommunicationState, EventPublication, EventSubscription, InboundData,
    InboundEvent, JoinOptions, PublishCallback, PublishOptions,
};
