//! Protocol client capability.
//!
//! A session drives exactly one [`ProtocolClient`]. The wire protocol itself
//! lives behind this trait; `zaapi-bridge` provides the production
//! implementation.

pub mod client;
pub mod event;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use {
    client::{ClientFactory, EventHandler, LoginStream, ProtocolClient},
    event::{InboundMessage, LoginEvent, ProtocolEvent},
};
