// End-to-end tests against a local tokio-tungstenite server.
// Each test binds 127.0.0.1:0, so they can run in parallel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use socket_manager::{ConnectionManager, ErrorEvent, Event, EventKind, Phase};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// What the server observed.
#[derive(Debug, Default)]
struct ServerLog {
    path: Option<String>,
    received: Vec<String>,
}

/// Accept one connection. After the first text frame, reply with `replies`.
async fn spawn_server(replies: Vec<&'static str>) -> (String, Arc<Mutex<ServerLog>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(ServerLog::default()));

    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let path_log = Arc::clone(&server_log);
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
            path_log.lock().unwrap().path = Some(req.uri().path().to_string());
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        // Runs until the client's close handshake completes
        let mut replied = false;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                server_log.lock().unwrap().received.push(text);
                if !replied {
                    replied = true;
                    for reply in &replies {
                        ws.send(Message::Text((*reply).to_string())).await.unwrap();
                    }
                }
            }
        }
    });

    (format!("http://{addr}"), log)
}

fn record_all(manager: &ConnectionManager) -> Arc<Mutex<Vec<Event>>> {
    let seen: Arc<Mutex<Vec<Event>>> = Arc::default();
    for kind in EventKind::ALL {
        let seen = Arc::clone(&seen);
        manager.on(kind, move |event| {
            seen.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    seen
}

/// Pump the manager until `seen` holds `count` events.
async fn pump_until(manager: &mut ConnectionManager, seen: &Arc<Mutex<Vec<Event>>>, count: usize) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while seen.lock().unwrap().len() < count {
            assert!(manager.process_next().await, "manager ran out of events");
        }
    })
    .await
    .expect("timed out waiting for events");
}

#[tokio::test]
async fn test_chat_roundtrip_against_real_server() {
    let (base_url, server) = spawn_server(vec![r#"{"b":2}"#, "not-json"]).await;
    let mut manager = ConnectionManager::new(base_url.clone());
    let seen = record_all(&manager);

    manager.connect("/chat");
    assert_eq!(manager.state(), Phase::Connecting);

    pump_until(&mut manager, &seen, 1).await;
    assert_eq!(manager.state(), Phase::Open);
    assert!(manager.is_connected());
    assert_eq!(server.lock().unwrap().path.as_deref(), Some("/chat"));

    manager.send(serde_json::json!({ "a": 1 })).unwrap();
    pump_until(&mut manager, &seen, 3).await;

    manager.close();
    assert_eq!(manager.state(), Phase::Closed);
    assert!(manager.send("late").is_err());

    tokio::time::timeout(STEP_TIMEOUT, async { while manager.process_next().await {} })
        .await
        .expect("close notification never arrived");

    assert_eq!(server.lock().unwrap().received, vec![r#"{"a":1}"#]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    match &seen[0] {
        Event::Open(open) => {
            assert_eq!(open.url, format!("{}/chat", base_url.replacen("http://", "ws://", 1)));
        }
        other => panic!("expected open, got {other:?}"),
    }
    assert_eq!(seen[1], Event::Message(serde_json::json!({ "b": 2 })));
    match &seen[2] {
        Event::Error(ErrorEvent::Parse(parse)) => assert_eq!(parse.raw, "not-json"),
        other => panic!("expected parse error, got {other:?}"),
    }
    assert!(matches!(seen[3], Event::Close(_)));
}

#[tokio::test]
async fn test_unreachable_server_reports_error_then_close() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut manager = ConnectionManager::new(format!("http://{addr}"));
    let seen = record_all(&manager);
    manager.connect("/ws");

    tokio::time::timeout(STEP_TIMEOUT, async { while manager.process_next().await {} })
        .await
        .expect("connection failure never reported");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], Event::Error(ErrorEvent::Transport(_))));
    assert!(matches!(seen[1], Event::Close(ref close) if close.code == 1006));
    assert_eq!(manager.state(), Phase::Closed);
}

#[test]
fn test_connect_outside_runtime_reports_failure_instead_of_panicking() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut manager = ConnectionManager::new(format!("http://{addr}"));
    let seen = record_all(&manager);
    manager.connect("/ws");

    let deadline = std::time::Instant::now() + STEP_TIMEOUT;
    while manager.has_pending() {
        assert!(std::time::Instant::now() < deadline, "connection failure never reported");
        if manager.poll_events() == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], Event::Error(ErrorEvent::Transport(_))));
    assert!(matches!(seen[1], Event::Close(ref close) if close.code == 1006));
    assert_eq!(manager.state(), Phase::Closed);
}

#[tokio::test]
async fn test_close_during_stalled_handshake_still_notifies() {
    // Accepts TCP but never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(());
        // Hold the socket open without replying
        std::future::pending::<()>().await;
        drop(stream);
    });

    let mut manager = ConnectionManager::new(format!("http://{addr}"));
    let seen = record_all(&manager);
    manager.connect("/ws");
    tokio::time::timeout(STEP_TIMEOUT, accepted_rx)
        .await
        .expect("server never saw the connection")
        .unwrap();
    assert_eq!(manager.state(), Phase::Connecting);

    manager.close();
    assert_eq!(manager.state(), Phase::Closed);

    tokio::time::timeout(STEP_TIMEOUT, async { while manager.process_next().await {} })
        .await
        .expect("close notification never arrived");

    assert!(!manager.has_pending());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], Event::Close(ref close) if close.code == 1006));
}
