//! chatrelay-client — the seam between the gateway and a messaging session
//!
//! The messaging protocol itself lives outside this workspace. This crate
//! defines what the gateway needs from it (the [`MessagingClient`] trait and
//! the [`ClientEvent`]s it reports), how recipients are addressed, a bridge
//! client that drives an external protocol sidecar over WebSocket, and the
//! supervisor that restarts the session when it closes.

pub mod address;
pub mod bridge;
pub mod client;
pub mod event;
pub mod supervisor;

pub use bridge::{BridgeClient, BridgeConfig};
pub use client::{MessagingClient, SendError};
pub use event::ClientEvent;
pub use supervisor::{ReconnectPolicy, Supervisor};
