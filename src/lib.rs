//! socket-manager - client-side WebSocket connection manager.
//!
//! This crate wraps one persistent WebSocket connection behind a small
//! manager that mirrors the socket's lifecycle, decodes inbound JSON and
//! fans events out to registered handlers.
//!
//! # Architecture
//!
//! ```text
//!   ConnectionManager ──connect()──► Connector::open() ──► Transport (tokio task)
//!         ▲                                                    │
//!         │  process_next() / poll_events()                    │ TransportEvent
//!         └──────────────── mpsc ◄─────────────────────────────┘
//!         │
//!         ▼
//!   EventHandlers (message | open | close | error) ──► handler callbacks
//! ```
//!
//! # Modules
//!
//! - [`connection`] - Manager, event registry and transport seam
//! - [`ws`] - tokio-tungstenite reader/writer wrapper
//! - [`config`] - Configuration loading/saving for the `sockctl` binary

pub mod config;
pub mod connection;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use connection::{
    CloseEvent, ConnectionError, ConnectionManager, ErrorEvent, Event, EventHandlers, EventKind,
    OpenEvent, Outbound, ParseError, Phase, Subscription,
};
