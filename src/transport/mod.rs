//! Transport module - bus link handling.
//!
//! Provides one stream type over:
//! - RS485 serial adapters
//! - RS485-to-TCP converters

mod link;

pub use link::{connect, BusStream};
