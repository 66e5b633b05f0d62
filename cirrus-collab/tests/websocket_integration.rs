//! Integration tests for the WebSocket transport.
//!
//! These tests start a minimal tokio-tungstenite backend on a free port and
//! drive a real session against it through the full network stack.

use cirrus_collab::{ConnectionState, LocalUser, Session, SessionConfig, SyncState};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const CLOSED: &str = "<closed>";

/// What the test backend observed.
struct Backend {
    port: u16,
    uri: oneshot::Receiver<String>,
    frames: mpsc::UnboundedReceiver<String>,
}

/// Accept one client. Every text frame is forwarded to `frames`; a join is
/// answered with a collaborator, a malformed frame and a sync status.
async fn start_backend() -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (uri_tx, uri_rx) = oneshot::channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(request.uri().to_string());
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();

        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => {
                    let text = text.as_str().to_string();
                    let is_join = text.contains("\"join_file\"");
                    let _ = frames_tx.send(text);
                    if is_join {
                        let replies = [
                            r#"{"type":"user_joined","resourceId":"doc-1","userId":"bob","userName":"Bob"}"#,
                            "this is not json",
                            r#"{"type":"mystery_event","x":1}"#,
                            r#"{"type":"sync_status","fileId":"doc-1","status":"synced","progress":100}"#,
                        ];
                        for reply in replies {
                            if ws.send(Message::Text(reply.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Message::Close(_) => {
                    let _ = frames_tx.send(CLOSED.to_string());
                }
                _ => {}
            }
        }
    });

    Backend { port, uri: uri_rx, frames: frames_rx }
}

fn config(port: u16) -> SessionConfig {
    SessionConfig {
        server_url: format!("ws://127.0.0.1:{port}/collab"),
        user: LocalUser::new("u1", "Ada"),
        token: Some("secret".into()),
        ..SessionConfig::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_session_over_websocket() {
    let mut backend = start_backend().await;
    let session = Session::connect(config(backend.port));
    session.join_resource("doc-1");

    let uri = timeout(Duration::from_secs(5), &mut backend.uri).await.unwrap().unwrap();
    assert!(uri.starts_with("/collab?"));
    assert!(uri.contains("user=u1"));
    assert!(uri.contains("name=Ada"));
    assert!(uri.contains("token=secret"));

    let first = timeout(Duration::from_secs(5), backend.frames.recv()).await.unwrap().unwrap();
    let join: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(join["type"], "join_file");
    assert_eq!(join["resourceId"], "doc-1");
    assert_eq!(join["userId"], "u1");

    // Malformed and unknown frames are skipped; the link stays up.
    eventually(|| session.sync_status("doc-1").is_some()).await;
    let members = session.presence("doc-1");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_name, "Bob");
    assert_eq!(session.sync_status("doc-1").unwrap().status, SyncState::Synced);
    assert_eq!(session.connection().state, ConnectionState::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn test_requests_encoded_as_json_frames() {
    let mut backend = start_backend().await;
    let session = Session::connect(config(backend.port));
    session.post_comment("doc-9", serde_json::json!({"text": "hi"}));
    session.request_sync("doc-9");

    let mut frames = Vec::new();
    while frames.len() < 2 {
        let frame = timeout(Duration::from_secs(5), backend.frames.recv()).await.unwrap().unwrap();
        frames.push(serde_json::from_str::<serde_json::Value>(&frame).unwrap());
    }

    assert_eq!(frames[0]["type"], "add_comment");
    assert_eq!(frames[0]["comment"]["text"], "hi");
    assert_eq!(frames[1]["type"], "request_sync");
    assert_eq!(frames[1]["fileId"], "doc-9");

    session.shutdown().await;
}

#[tokio::test]
async fn test_local_close_sends_close_frame() {
    let mut backend = start_backend().await;
    let session = Session::connect(config(backend.port));
    eventually(|| session.connection().state == ConnectionState::Connected).await;

    session.shutdown().await;

    let frame = timeout(Duration::from_secs(5), backend.frames.recv()).await.unwrap();
    assert_eq!(frame.as_deref(), Some(CLOSED));
}
