//! Transport seam between the manager and the socket.
//!
//! A [`Connector`] opens a [`Transport`] for a URL. The transport reports
//! lifecycle and data through an [`EventSink`] and exposes its ready state
//! synchronously. [`WsConnector`] is the production implementation: one
//! tokio task per connection, driven by the [`crate::ws`] reader/writer.
//!
//! # Threading Model
//!
//! Each `WsTransport` owns a spawned task that reads frames and listens on
//! an unbounded `mpsc` for outgoing commands. Dropping the transport drops
//! the command sender, which the task treats as a close request.
//!
//! Inside a tokio runtime the task is spawned onto it. Outside one, the
//! task gets a dedicated OS thread running a current-thread runtime.

// Rust guideline compliant 2026-02

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::ws::{self, WsFrame, CLOSE_ABNORMAL};

use super::{ConnectionError, Phase, SharedPhase};

/// How long to wait for the peer's close frame after we start closing.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw event produced by a transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// A text payload arrived.
    Message(String),
    /// Transport-level failure.
    Error(String),
    /// Transport closed. Always the last event of a transport.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Where a transport delivers its events.
///
/// Tagged with the generation of the handle it belongs to, so the manager
/// can tell a live connection's events from a retired one's.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event. Returns `false` if the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// An open (or opening) socket owned by the manager.
pub trait Transport: Send + std::fmt::Debug {
    /// Current ready state.
    fn phase(&self) -> Phase;

    /// Queue a text frame for sending. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::SendFailed`] if the transport can no
    /// longer accept writes.
    fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    /// Request closure. The transport later emits [`TransportEvent::Close`].
    fn close(&self);
}

/// Factory for transports.
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Start opening a transport to `url`. Must not block.
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Transport>;
}

/// Outgoing command from the manager to a connection task.
#[derive(Debug)]
enum WsCommand {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Initiate a graceful close.
    Close,
}

/// Opens tokio-tungstenite backed transports.
///
/// Works with or without an ambient tokio runtime. If the connection task
/// cannot be started at all, the transport reports `Error` then `Close`
/// with code 1006 instead of failing the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Transport> {
        let phase = SharedPhase::new(Phase::Connecting);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task = run_connection(url.to_string(), sink.clone(), phase.clone(), command_rx);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => spawn_connection_thread(task, sink, phase.clone()),
        }

        Box::new(WsTransport { phase, command_tx })
    }
}

/// Run a connection task on a dedicated thread with its own runtime.
fn spawn_connection_thread<F>(task: F, sink: EventSink, phase: SharedPhase)
where
    F: Future<Output = ()> + Send + 'static,
{
    let thread_sink = sink.clone();
    let thread_phase = phase.clone();
    let spawn_result = std::thread::Builder::new()
        .name(format!("ws-{}", sink.generation))
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(task),
                Err(e) => {
                    log::error!("Failed to create tokio runtime: {}", e);
                    fail_to_start(
                        &thread_sink,
                        &thread_phase,
                        format!("Failed to create tokio runtime: {e}"),
                    );
                }
            }
        });

    if let Err(e) = spawn_result {
        log::error!("Failed to spawn WebSocket thread: {}", e);
        fail_to_start(
            &sink,
            &phase,
            format!("Failed to spawn WebSocket thread: {e}"),
        );
    }
}

/// Report a connection that never got to run.
fn fail_to_start(sink: &EventSink, phase: &SharedPhase, error: String) {
    sink.emit(TransportEvent::Error(error));
    finish(sink, phase, CLOSE_ABNORMAL, "connection task not started");
}

/// Handle to a running connection task.
#[derive(Debug)]
struct WsTransport {
    phase: SharedPhase,
    command_tx: mpsc::UnboundedSender<WsCommand>,
}

impl Transport for WsTransport {
    fn phase(&self) -> Phase {
        self.phase.get()
    }

    fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if self.phase.get() != Phase::Open {
            return Err(ConnectionError::SendFailed(format!(
                "transport is {}",
                self.phase.get()
            )));
        }
        self.command_tx
            .send(WsCommand::Text(text))
            .map_err(|_| ConnectionError::SendFailed("connection task has exited".to_string()))
    }

    fn close(&self) {
        if matches!(self.phase.get(), Phase::Connecting | Phase::Open) {
            self.phase.set(Phase::Closing);
        }
        // Task may already be gone; its Close event has then been emitted
        let _ = self.command_tx.send(WsCommand::Close);
    }
}

/// Report closure and mark the transport closed.
fn finish(sink: &EventSink, phase: &SharedPhase, code: u16, reason: impl Into<String>) {
    phase.set(Phase::Closed);
    sink.emit(TransportEvent::Close {
        code,
        reason: reason.into(),
    });
}

/// Drive one WebSocket connection until it closes.
///
/// Emits `Open` once the handshake completes, `Message` per text frame,
/// `Error` on failures, and exactly one terminal `Close`.
async fn run_connection(
    url: String,
    sink: EventSink,
    phase: SharedPhase,
    mut command_rx: mpsc::UnboundedReceiver<WsCommand>,
) {
    log::debug!("Connecting to {}", url);

    let connect = ws::connect(&url);
    tokio::pin!(connect);

    // Handshake, abandoned if the owner closes first
    let (mut writer, mut reader) = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(pair) => break pair,
                Err(e) => {
                    log::warn!("Failed to connect to {}: {:#}", url, e);
                    sink.emit(TransportEvent::Error(format!("{e:#}")));
                    finish(&sink, &phase, CLOSE_ABNORMAL, "connection failed");
                    return;
                }
            },
            command = command_rx.recv() => match command {
                Some(WsCommand::Text(_)) => {
                    log::debug!("Dropping frame queued before {} opened", url);
                }
                Some(WsCommand::Close) | None => {
                    log::info!("Closed {} before the handshake completed", url);
                    finish(&sink, &phase, CLOSE_ABNORMAL, "closed before open");
                    return;
                }
            },
        }
    };

    phase.set(Phase::Open);
    sink.emit(TransportEvent::Open);
    log::info!("Connected to {}", url);

    let mut close_deadline: Option<tokio::time::Instant> = None;

    loop {
        let deadline = close_deadline.unwrap_or_else(tokio::time::Instant::now);

        tokio::select! {
            // Incoming WebSocket frame
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        sink.emit(TransportEvent::Message(text));
                    }
                    Some(Ok(WsFrame::Control)) => {}
                    Some(Ok(WsFrame::Close { code, reason })) => {
                        // Flush tungstenite's queued close reply
                        if let Err(e) = writer.close().await {
                            log::debug!("Close reply to {} not flushed: {:#}", url, e);
                        }
                        log::info!("WebSocket {} closed ({})", url, code);
                        finish(&sink, &phase, code, reason);
                        return;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket {} error: {:#}", url, e);
                        sink.emit(TransportEvent::Error(format!("{e:#}")));
                        finish(&sink, &phase, CLOSE_ABNORMAL, "");
                        return;
                    }
                    None => {
                        finish(&sink, &phase, CLOSE_ABNORMAL, "stream ended");
                        return;
                    }
                }
            }

            // Outgoing command from the manager
            command = command_rx.recv(), if close_deadline.is_none() => {
                match command {
                    Some(WsCommand::Text(text)) => {
                        if let Err(e) = writer.send_text(text).await {
                            sink.emit(TransportEvent::Error(format!("{e:#}")));
                            finish(&sink, &phase, CLOSE_ABNORMAL, "send failed");
                            return;
                        }
                    }
                    // Sender dropped means the owner let go of us
                    Some(WsCommand::Close) | None => {
                        phase.set(Phase::Closing);
                        if let Err(e) = writer.send_close().await {
                            log::debug!("Close frame to {} not sent: {:#}", url, e);
                        }
                        close_deadline = Some(tokio::time::Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                    }
                }
            }

            () = tokio::time::sleep_until(deadline), if close_deadline.is_some() => {
                log::warn!("Close handshake with {} timed out", url);
                finish(&sink, &phase, CLOSE_ABNORMAL, "close handshake timed out");
                return;
            }
        }
    }
}
