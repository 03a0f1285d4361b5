//! # coaty - Distributed-Agent Middleware for Collaborative IoT
//!
//! Autonomous peer agents exchange typed objects over a publish-subscribe
//! broker using a fixed catalogue of interaction patterns: advertise,
//! channel, discover/resolve, query/retrieve, update/complete,
//! call/return, raw, associate/io-value, and deadvertise.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use coaty::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Pick a binding. The in-process binding routes events between
//!     //    containers of one process; coaty-mqtt provides the MQTT one.
//!     let broker = InProcessBroker::new();
//!
//!     // 2. Resolve a container from components and configuration.
//!     let configuration = Configuration::builder()
//!         .with_identity_name("LightAgent")
//!         .with_namespace("building-7")
//!         .with_auto_start(true)
//!         .build()?;
//!     let container =
//!         Container::resolve(Components::new(), configuration, broker.binding()).await?;
//!
//!     // 3. Publish and observe events through the manager.
//!     let manager = container.communication_manager();
//!     let mut tasks = manager.observe_advertise_with_core_type(CoreType::Task);
//!     manager.publish_advertise(CoatyObject::with_core_type(CoreType::Task, "repair"))?;
//!     let event = tasks.recv().await;
//!     println!("observed: {event:?}");
//!
//!     container.shut_down().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Core Communication
//! - [`model`] - Objects, typed IO views, object filters and the matcher
//! - [`topic`] - The structured topic codec and wildcard matcher
//! - [`event`] - Typed event payloads and envelopes
//! - [`binding`] - The broker adapter contract and the in-process binding
//! - [`com`] - The communication manager and response correlation
//!
//! ## Agent Infrastructure
//! - [`runtime`] - Container, controllers, and configuration
//! - [`io_routing`] - Rule-based association of IO sources with actors
//! - [`tracking`] - Cross-agent object lifecycle tracking
//!
//! # Architecture Principles
//!
//! - Event kinds are a closed set implemented as tagged variants; the
//!   request/response pairs are sibling variants linked by correlation
//!   id, not a type hierarchy.
//! - The container owns all process-wide state; controllers hold handles
//!   to the manager, and the manager reaches observers only through
//!   opaque registration records.
//! - Transport faults never crash the host process: they surface through
//!   the communication state observable and per-publication callbacks,
//!   while the binding defers and retries across reconnects.

pub mod binding;
pub mod com;
pub mod event;
pub mod io_routing;
pub mod model;
pub mod prelude;
pub mod runtime;
pub mod topic;
pub mod tracking;

// Re-export commonly used types
pub use binding::{
    BindingError, CommunicationBinding, CommunicationState, EventPublication, EventSubscription,
    InProcessBinding, InProcessBroker, InboundData, InboundEvent, JoinOptions, PublishOptions,
};
pub use com::{
    CommunicationError, CommunicationManager, EventStream, IncomingCall, IncomingDiscover,
    IncomingQuery, IncomingUpdate, OperatingState, ResponseObservable,
};
pub use event::{CommunicationEvent, CommunicationEventData, CommunicationEventType, ValidationError};
pub use model::{CoatyObject, CoreType, Identity, IoActor, IoContext, IoNode, IoSource};
pub use runtime::{Components, Configuration, Container, Controller, Runtime};
pub use topic::TopicStructure;
