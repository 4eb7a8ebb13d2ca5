//! Connection management for a single WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager
//!     ├── ConnectionHandle (at most one; owns Box<dyn Transport>)
//!     ├── EventHandlers (message | open | close | error)
//!     └── mpsc receiver of (generation, TransportEvent)
//! ```
//!
//! Transports run on their own tokio task and report through an
//! [`EventSink`]. The manager decodes and dispatches those events on the
//! caller's context when it is pumped with
//! [`ConnectionManager::process_next`] or [`ConnectionManager::poll_events`].
//!
//! # Usage
//!
//! ```ignore
//! let mut manager = ConnectionManager::new("http://localhost:3000");
//! manager.on_message(|value| {
//!     log::info!("got {value}");
//!     Ok(())
//! });
//! manager.connect("/chat");
//! while manager.process_next().await {
//!     if manager.is_connected() {
//!         manager.send(serde_json::json!({ "a": 1 }))?;
//!     }
//! }
//! ```

// Rust guideline compliant 2026-02

pub mod events;
pub mod manager;
pub mod transport;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phase of a transport, mirrored by the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Handshake in progress.
    Connecting,
    /// Connected and ready to send.
    Open,
    /// Closing handshake in progress.
    Closing,
    /// Not connected.
    #[default]
    Closed,
}

impl Phase {
    /// Upper-case label (`CONNECTING`, `OPEN`, `CLOSING`, `CLOSED`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ready state shared between a transport task and its owner.
///
/// The transport task writes it; the manager only reads it, so
/// [`ConnectionManager::state`] never diverges from the socket.
#[derive(Debug, Clone)]
pub struct SharedPhase(Arc<AtomicU8>);

impl SharedPhase {
    /// Create a new shared phase starting at `initial`.
    #[must_use]
    pub fn new(initial: Phase) -> Self {
        Self(Arc::new(AtomicU8::new(initial.to_u8())))
    }

    /// Get the current phase.
    #[must_use]
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the phase.
    pub fn set(&self, phase: Phase) {
        self.0.store(phase.to_u8(), Ordering::Release);
    }
}

/// Errors reported synchronously by the connection manager.
#[derive(Debug)]
pub enum ConnectionError {
    /// Event name is not one of `message`, `open`, `close`, `error`.
    UnknownEvent(String),
    /// No open connection to send on.
    NotConnected,
    /// Outbound value could not be serialized to JSON.
    Serialize(serde_json::Error),
    /// The transport refused the write.
    SendFailed(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEvent(name) => write!(f, "Unknown event type: {name}"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::Serialize(e) => write!(f, "Failed to serialize message: {e}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

// Re-exports
pub use events::{
    CloseEvent, ErrorEvent, Event, EventHandlers, EventKind, Handler, OpenEvent, ParseError,
    Subscription,
};
pub use manager::{ConnectionManager, Outbound};
pub use transport::{Connector, EventSink, Transport, TransportEvent, WsConnector};
