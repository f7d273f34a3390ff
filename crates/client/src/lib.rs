//! Talkline chat session core.
//!
//! This crate is the headless heart of the talkline browser client: it owns
//! the single realtime connection to the chat backend, multiplexes it across
//! rooms, reconciles it with the HTTP fallback path, and recovers from
//! transport failure without losing messages or duplicating delivery.
//!
//! The rendering layer reads the [`store::ChatStore`] through a
//! [`session::ChatSession`] and subscribes to its change notifications; it
//! never mutates chat state directly.

pub mod api_client;
pub mod dispatcher;
pub mod session;
pub mod store;
pub mod ws;

pub use api_client::ApiClient;
pub use session::ChatSession;
pub use store::ChatStore;
pub use ws::{ConnectionStatus, ReconnectConfig};
