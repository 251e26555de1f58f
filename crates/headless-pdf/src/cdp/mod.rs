//! CDP (Chrome DevTools Protocol) Client Implementation
//!
//! Core principle: one connection per target, strictly sequential calls.
//! Events interleaved with responses are buffered, never lost.

pub mod broker;
pub mod client;
pub mod connection;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{EventBroker, NetworkTracker};
pub use client::{CDPClient, CDPError, WaitCondition};
pub use connection::{Connector, Transport, WebSocketConnector};
pub use protocol::{CDPEvent, CDPRequest, Frame, TargetId};
