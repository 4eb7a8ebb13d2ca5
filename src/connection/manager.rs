//! The connection manager.
//!
//! Owns at most one transport at a time, decodes inbound payloads and
//! dispatches events to the shared [`EventHandlers`].

// Rust guideline compliant 2026-02

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::ws;

use super::events::{
    CloseEvent, ErrorEvent, Event, EventHandlers, EventKind, OpenEvent, ParseError, Subscription,
};
use super::transport::{Connector, EventSink, Transport, TransportEvent, WsConnector};
use super::{ConnectionError, Phase};

/// Outbound payload accepted by [`ConnectionManager::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON text before sending.
    Json(serde_json::Value),
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Outbound {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// The manager's owned reference to one transport.
#[derive(Debug)]
struct ConnectionHandle {
    generation: u64,
    url: String,
    transport: Box<dyn Transport>,
}

/// Client-side manager for one WebSocket connection.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Origin-style base URL (`http://host:port`).
    base_url: String,
    connector: Arc<dyn Connector>,
    handlers: EventHandlers,
    current: Option<ConnectionHandle>,
    /// Generations closed by us whose `Close` event has not arrived yet.
    retired: HashSet<u64>,
    next_generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
}

impl ConnectionManager {
    /// Create a manager using the tokio-tungstenite transport.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_connector(base_url, Arc::new(WsConnector))
    }

    /// Create a manager with a custom transport factory.
    #[must_use]
    pub fn with_connector(base_url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            base_url: base_url.into(),
            connector,
            handlers: EventHandlers::new(),
            current: None,
            retired: HashSet::new(),
            next_generation: 0,
            events_tx,
            events_rx,
        }
    }

    /// Base URL this manager was constructed with.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Socket URL of the current connection, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.current.as_ref().map(|handle| handle.url.as_str())
    }

    /// Shared handler registry, for subscribing from inside handlers.
    #[must_use]
    pub fn handlers(&self) -> EventHandlers {
        self.handlers.clone()
    }

    /// Open a connection to `endpoint` under the base URL.
    ///
    /// A no-op (with a warning) while a connection is opening or open.
    pub fn connect(&mut self, endpoint: &str) {
        if let Some(handle) = &self.current {
            match handle.transport.phase() {
                Phase::Connecting | Phase::Open => {
                    log::warn!("WebSocket already connected to {}", handle.url);
                    return;
                }
                // Shutting down on its own; retire it and open a fresh one
                Phase::Closing | Phase::Closed => self.retire_current(),
            }
        }

        let url = ws::socket_url(&self.base_url, endpoint);
        let generation = self.next_generation;
        self.next_generation += 1;

        log::debug!("Opening connection #{} to {}", generation, url);
        let sink = EventSink::new(generation, self.events_tx.clone());
        let transport = self.connector.open(&url, sink);

        self.current = Some(ConnectionHandle {
            generation,
            url,
            transport,
        });
    }

    /// Send a text or JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] unless the connection is
    /// open. Nothing is queued for later.
    pub fn send(&self, data: impl Into<Outbound>) -> Result<(), ConnectionError> {
        let handle = self
            .current
            .as_ref()
            .filter(|handle| handle.transport.phase() == Phase::Open)
            .ok_or(ConnectionError::NotConnected)?;

        let text = match data.into() {
            Outbound::Text(text) => text,
            Outbound::Json(value) => serde_json::to_string(&value)?,
        };
        handle.transport.send_text(text)
    }

    /// Serialize `value` to JSON and send it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`], plus [`ConnectionError::Serialize`].
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        self.send(Outbound::Text(serde_json::to_string(value)?))
    }

    /// Close the connection, if any.
    ///
    /// The handle is dropped immediately; the transport's own `close` event
    /// is still dispatched when it arrives.
    pub fn close(&mut self) {
        if self.current.is_some() {
            self.retire_current();
        }
    }

    fn retire_current(&mut self) {
        if let Some(handle) = self.current.take() {
            log::debug!("Closing connection #{} to {}", handle.generation, handle.url);
            handle.transport.close();
            self.retired.insert(handle.generation);
        }
    }

    /// Current lifecycle phase; `Closed` when there is no connection.
    #[must_use]
    pub fn state(&self) -> Phase {
        self.current
            .as_ref()
            .map_or(Phase::Closed, |handle| handle.transport.phase())
    }

    /// `true` iff [`Self::state`] is [`Phase::Open`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == Phase::Open
    }

    /// Register a handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.on(kind, handler)
    }

    /// Register a handler by category name.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnknownEvent`] for unrecognised names.
    pub fn on_named<F>(&self, name: &str, handler: F) -> Result<Subscription, ConnectionError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.on_named(name, handler)
    }

    /// Register a handler receiving decoded messages.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(EventKind::Message, move |event| match event {
            Event::Message(value) => handler(value),
            _ => Ok(()),
        })
    }

    /// Register a handler for connection open.
    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OpenEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(EventKind::Open, move |event| match event {
            Event::Open(open) => handler(open),
            _ => Ok(()),
        })
    }

    /// Register a handler for connection close.
    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(EventKind::Close, move |event| match event {
            Event::Close(close) => handler(close),
            _ => Ok(()),
        })
    }

    /// Register a handler for transport and parse errors.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ErrorEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| match event {
            Event::Error(error) => handler(error),
            _ => Ok(()),
        })
    }

    /// Whether any transport may still produce events.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.current.is_some() || !self.retired.is_empty()
    }

    /// Dispatch every event already delivered, without waiting.
    ///
    /// Returns the number of transport events processed.
    pub fn poll_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            self.handle_transport_event(generation, event);
            count += 1;
        }
        count
    }

    /// Wait for the next transport event and dispatch it.
    ///
    /// Returns `false` without waiting when no transport can produce
    /// events any more. Cancel-safe.
    pub async fn process_next(&mut self) -> bool {
        if !self.has_pending() {
            return false;
        }
        match self.events_rx.recv().await {
            Some((generation, event)) => {
                self.handle_transport_event(generation, event);
                true
            }
            // Unreachable while we hold events_tx
            None => false,
        }
    }

    fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|handle| handle.generation == generation);

        if !is_current {
            // Closed by us: only the close notification still goes out
            if let TransportEvent::Close { code, reason } = event {
                if self.retired.remove(&generation) {
                    self.handlers
                        .emit(&Event::Close(CloseEvent { code, reason }));
                }
            } else {
                log::debug!("Dropping event from retired connection #{}", generation);
            }
            return;
        }

        let dispatched = match event {
            TransportEvent::Open => {
                let url = self.url().unwrap_or_default().to_string();
                Event::Open(OpenEvent { url })
            }
            TransportEvent::Message(raw) => decode(raw),
            TransportEvent::Error(description) => {
                Event::Error(ErrorEvent::Transport(description))
            }
            TransportEvent::Close { code, reason } => {
                self.current = None;
                Event::Close(CloseEvent { code, reason })
            }
        };
        self.handlers.emit(&dispatched);
    }
}

/// Decode an inbound payload as JSON.
fn decode(raw: String) -> Event {
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => Event::Message(value),
        Err(e) => Event::Error(ErrorEvent::Parse(ParseError {
            error: e.to_string(),
            raw,
        })),
    }
}
