//! Realtime transport layer.
//!
//! [`connection`] wraps the single websocket and reports lifecycle events;
//! [`reconnect`] owns the connection status machine and all retry policy.
//! The session drives both: only the reconnection controller ever decides to
//! connect, everything else just reads status and publishes.

pub mod connection;
pub mod reconnect;

pub use connection::{TransportEvent, WsConnection};
pub use reconnect::{
    ConnectionStatus, ReconnectAction, ReconnectConfig, ReconnectController, ReconnectMachine,
};
