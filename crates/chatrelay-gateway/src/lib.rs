//! chatrelay-gateway — HTTP + WebSocket front for a messaging session
//!
//! Relays the session's status and inbound messages to real-time subscribers
//! and exposes a token-gated REST surface for reading the pairing code and
//! sending messages.

pub mod api;
pub mod auth;
pub mod events;
pub mod protocol;
pub mod qr;
pub mod registry;
pub mod server;
pub mod session;

pub use events::EventPump;
pub use registry::{Subscriber, SubscriberRegistry};
pub use server::GatewayServer;
pub use session::SessionRelay;
