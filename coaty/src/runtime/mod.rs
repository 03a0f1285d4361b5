//! Container runtime: configuration, controller capability set, and
//! dependency wiring.

pub mod config;
pub mod container;
pub mod controller;
pub mod info;

pub use config::{CommonOptions, CommunicationOptions, Configuration, IoNodeDefinition};
pub use container::{Components, Container, ContainerError};
pub use controller::{shared, Controller, SharedController};
pub use info::{AgentInfo, Runtime};
