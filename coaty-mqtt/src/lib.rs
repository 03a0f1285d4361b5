//! # coaty-mqtt - MQTT Communication Binding
//!
//! The reference broker binding for the `coaty` agent middleware,
//! speaking MQTT 3.1.1 at QoS 0 with clean sessions.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use coaty::prelude::*;
//! use coaty_mqtt::{MqttBinding, MqttBindingOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let binding = MqttBinding::new(MqttBindingOptions::new("mqtt://localhost:1883"));
//!     let configuration = Configuration::builder()
//!         .with_identity_name("FieldAgent")
//!         .with_auto_start(true)
//!         .build()?;
//!     let container = Container::resolve(Components::new(), configuration, binding).await?;
//!     // ... publish and observe through container.communication_manager()
//!     container.shut_down().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Transport Behavior
//!
//! - Clean session and QoS 0 for every publication and subscription; no
//!   persistent broker sessions.
//! - The binding owns resubscription and republication across
//!   reconnects; join events always precede deferred user publications.
//! - The unjoin event is installed as the broker-held last will, so
//!   abrupt disconnection produces a deadvertise to peers.
//! - Client identifiers are derived deterministically from the agent
//!   identity and conform to MQTT 3.1 (23 bytes, restricted charset).

mod binding;
mod options;
mod queue;
mod table;

pub use binding::MqttBinding;
pub use options::{
    client_id, MqttBindingOptions, MqttTlsOptions, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_KEEPALIVE_SECS, DEFAULT_RECONNECT_PERIOD_MS,
};
