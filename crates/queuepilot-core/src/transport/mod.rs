//! Persistent control connection to the browser.
//!
//! The keepalive policy is an explicit connection parameter, applied once
//! when the connection is opened and enforced for its whole lifetime.

pub mod keepalive;
pub mod websocket;

pub use keepalive::{ConnectParams, KeepalivePolicy};
pub use websocket::{ControlClient, ControlConnection, ControlTransport, WebSocketTransport};
