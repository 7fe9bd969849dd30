//! # wallpad-bridge
//!
//! Bridge between an RS485 wallpad bus and an MQTT broker.
//!
//! Wallpad controllers share a half-duplex bus with lights, outlets,
//! thermostats, ventilation, the gas valve and energy meters. This crate turns
//! the raw byte stream into named device properties and turns property-set
//! requests back into bus frames.
//!
//! ## Architecture
//!
//! - **Protocol**: framing policies, frame decoder and checksum policies
//! - **Registry**: per-family tables of status, acknowledgment and command messages
//! - **Engine**: dispatcher, state store and a serialized command queue driven
//!   by a single [`Bridge`] task
//! - **Edges**: serial/TCP transport, MQTT topics and configuration
//!
//! ## Example
//!
//! ```ignore
//! use wallpad_bridge::{transport, Bridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> wallpad_bridge::Result<()> {
//!     let config = BridgeConfig::from_path("/data/options.json")?;
//!     let (changes, _rx) = tokio::sync::mpsc::unbounded_channel();
//!     let mut bridge = config.bridge_builder().build(changes);
//!     let _handle = bridge.handle();
//!
//!     let stream = transport::connect(&config.transport).await?;
//!     bridge.run(stream).await
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod family;
pub mod mqtt;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod state;
pub mod topic;
pub mod transport;
pub mod value;

pub use bridge::{Bridge, BridgeBuilder, BridgeHandle, ChangeReason, CommandTicket, StateChange};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use family::ProtocolKind;
pub use queue::CommandReceipt;
pub use value::{DeviceKind, PropertyUpdate, PropertyValue};
