//! Event categories, payloads and the handler registry.
//!
//! Handlers subscribe to one of four fixed categories and receive the
//! dispatched [`Event`] by reference. Registration returns a
//! [`Subscription`] token that removes exactly that entry.
//!
//! # Dispatch
//!
//! [`EventHandlers::emit`] snapshots the category's handlers under the lock,
//! releases it, then invokes each handler in registration order. Handlers
//! may therefore subscribe or unsubscribe from inside a callback without
//! deadlocking, and the in-flight dispatch is unaffected. A handler that
//! returns `Err` or panics is logged and skipped; the rest still run.

// Rust guideline compliant 2026-02

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use super::ConnectionError;

/// The four event categories a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A decoded inbound message.
    Message,
    /// The transport finished its handshake.
    Open,
    /// The transport closed.
    Close,
    /// A transport error or an undecodable inbound payload.
    Error,
}

impl EventKind {
    /// Every category, in registry order.
    pub const ALL: [Self; 4] = [Self::Message, Self::Open, Self::Close, Self::Error];

    /// Lower-case name used by [`EventHandlers::on_named`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Message => 0,
            Self::Open => 1,
            Self::Close => 2,
            Self::Error => 3,
        }
    }
}

impl FromStr for EventKind {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConnectionError::UnknownEvent(s.to_string()))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of an `open` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenEvent {
    /// Socket URL the transport connected to.
    pub url: String,
}

/// Payload of a `close` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseEvent {
    /// WebSocket close code (1000 = normal, 1006 = abnormal).
    pub code: u16,
    /// Close reason, empty when the peer sent none.
    pub reason: String,
}

/// An inbound payload that was not valid JSON.
///
/// Serializes as `{"type":"parse_error","error":"...","raw":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "parse_error")]
pub struct ParseError {
    /// Decoder error description.
    pub error: String,
    /// The undecoded payload, exactly as received.
    pub raw: String,
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEvent {
    /// Error reported by the transport, passed through untouched.
    Transport(String),
    /// Inbound payload failed to decode. The connection stays open.
    Parse(ParseError),
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Parse(e) => write!(f, "parse error: {} (raw: {:?})", e.error, e.raw),
        }
    }
}

/// A dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Decoded JSON message.
    Message(serde_json::Value),
    /// Connection opened.
    Open(OpenEvent),
    /// Connection closed.
    Close(CloseEvent),
    /// Transport or decode error.
    Error(ErrorEvent),
}

impl Event {
    /// The category this event is dispatched under.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Open(_) => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// A registered event handler.
///
/// Returning `Err` is reported through the log and does not stop other
/// handlers from running.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

/// Per-category handler lists. The category set is the fixed array index.
#[derive(Default)]
struct Registry {
    slots: [Vec<Entry>; 4],
    next_id: u64,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handler registry.
///
/// Cheap to clone; clones share the same registry, so a handler can hold one
/// to register further handlers while a dispatch is in progress.
#[derive(Clone, Default)]
pub struct EventHandlers {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.inner);
        let mut debug = f.debug_struct("EventHandlers");
        for kind in EventKind::ALL {
            debug.field(kind.as_str(), &registry.slots[kind.index()].len());
        }
        debug.field("next_id", &registry.next_id).finish()
    }
}

impl EventHandlers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(kind, Arc::new(handler))
    }

    /// Register an already shared handler.
    ///
    /// Adding the same `Handler` twice creates two independent entries.
    pub fn add(&self, kind: EventKind, handler: Handler) -> Subscription {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots[kind.index()].push(Entry { id, handler });

        log::debug!("Registered {} handler #{}", kind, id);
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Register a handler by category name.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnknownEvent`] if `name` is not one of
    /// `message`, `open`, `close`, `error`.
    pub fn on_named<F>(&self, name: &str, handler: F) -> Result<Subscription, ConnectionError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let kind = name.parse::<EventKind>()?;
        Ok(self.on(kind, handler))
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.inner).slots[kind.index()].len()
    }

    /// Check if any handler is registered for `kind`.
    #[must_use]
    pub fn has_handlers(&self, kind: EventKind) -> bool {
        self.count(kind) > 0
    }

    /// Total number of handlers across all categories.
    #[must_use]
    pub fn total(&self) -> usize {
        lock(&self.inner).slots.iter().map(Vec::len).sum()
    }

    /// Invoke every handler registered for the event's category.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(u64, Handler)> = lock(&self.inner).slots[kind.index()]
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.handler)))
            .collect();
        // Lock released here

        let mut invoked = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => invoked += 1,
                Ok(Err(e)) => log::warn!("{} handler #{} failed: {:#}", kind, id, e),
                Err(payload) => log::error!(
                    "{} handler #{} panicked: {}",
                    kind,
                    id,
                    panic_message(payload.as_ref())
                ),
            }
        }
        invoked
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Token for one handler registration.
///
/// Dropping the token leaves the handler registered.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Category this subscription belongs to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler this token was issued for.
    ///
    /// Returns `false` if it was already removed or the registry is gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let slot = &mut registry.slots[self.kind.index()];
        let Some(idx) = slot.iter().position(|entry| entry.id == self.id) else {
            return false;
        };
        slot.remove(idx);
        log::debug!("Unregistered {} handler #{}", self.kind, self.id);
        true
    }
}
