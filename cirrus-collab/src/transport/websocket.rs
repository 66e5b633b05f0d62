//! WebSocket transport for a real collaboration backend.
//!
//! Requests go out as JSON text frames. A writer task also sends a periodic
//! `Ping` so idle links are noticed by intermediaries, and a `Close` frame on
//! explicit local close. A reader task decodes text frames; frames that do
//! not decode are logged and dropped without ending the link.

use futures_util::{Sink, SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{Channel, Credentials, Transport, TransportError};
use crate::protocol::{InboundEvent, OutboundRequest, ProtocolError};

/// Opens WebSocket links with tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    heartbeat_interval: Duration,
    buffer: usize,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            buffer: 256,
        }
    }

    /// Interval between keep-alive pings.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Capacity of the inbound and outbound frame buffers.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WebSocketTransport {
    async fn open(&self, credentials: &Credentials) -> Result<Channel, TransportError> {
        let url = build_url(credentials)?;
        log::info!("Connecting to {} as {}", credentials.server_url, credentials.user_id);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<OutboundRequest>(self.buffer);
        let (in_tx, in_rx) = mpsc::channel::<InboundEvent>(self.buffer);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        // Writer task: outgoing channel + heartbeat → WebSocket
        let heartbeat = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
            loop {
                tokio::select! {
                    biased;
                    // Fires on explicit close and when the channel is dropped.
                    _ = &mut close_rx => {
                        while let Ok(request) = out_rx.try_recv() {
                            if !write_request(&mut ws_writer, request).await {
                                break;
                            }
                        }
                        let _ = ws_writer.send(Message::Close(None)).await;
                        break;
                    }
                    request = out_rx.recv() => {
                        let Some(request) = request else { break };
                        if !write_request(&mut ws_writer, request).await {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if ws_writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            log::debug!("WebSocket writer stopped");
        });

        // Reader task: WebSocket → incoming channel
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match InboundEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping inbound frame: {e}"),
                    },
                    Ok(Message::Binary(_)) => {
                        log::warn!("Dropping inbound frame: {}", ProtocolError::UnsupportedFrame("binary"));
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // ping/pong
                    Err(e) => {
                        log::warn!("WebSocket read failed: {e}");
                        break;
                    }
                }
            }
            log::info!("WebSocket link closed");
        });

        Ok(Channel::new(out_tx, in_rx).with_close_signal(close_tx))
    }
}

/// Encode and send one request. Returns `false` once the socket is unusable.
async fn write_request<S>(sink: &mut S, request: OutboundRequest) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = match request.encode() {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dropping outbound {}: {e}", request.kind());
            return true;
        }
    };
    match sink.send(Message::Text(frame.into())).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("WebSocket write failed: {e}");
            false
        }
    }
}

/// Server URL plus identity query parameters.
fn build_url(credentials: &Credentials) -> Result<Url, TransportError> {
    let mut url = Url::parse(&credentials.server_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", credentials.server_url)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl(format!("unsupported scheme `{other}`")));
        }
    }

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("user", &credentials.user_id);
        query.append_pair("name", &credentials.user_name);
        if let Some(token) = &credentials.token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}
