//! Websocket transport adapter built on tokio-tungstenite.
//!
//! Wraps exactly one realtime connection. The adapter exposes
//! connect/disconnect/publish/subscribe and reports lifecycle through
//! [`TransportEvent`]s on a channel handed to [`WsConnection::connect`].
//! It never retries on its own; retry policy lives entirely in the
//! reconnection controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

use talkline_shared::{ChatError, ClientFrame, ServerFrame, WsEnvelope};

/// Lifecycle and data events emitted by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Closed { code: Option<u16>, reason: String },
    Error(String),
    Frame(WsEnvelope<ServerFrame>),
}

/// A published frame on the wire: the destination plus the envelope.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundFrame<'a> {
    destination: &'a str,
    #[serde(flatten)]
    envelope: &'a WsEnvelope<ClientFrame>,
}

/// The single realtime connection.
#[derive(Debug)]
pub struct WsConnection {
    sender: UnboundedSender<(String, WsEnvelope<ClientFrame>)>,
    opened: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl WsConnection {
    /// Open the websocket, carrying the bearer credential as a query
    /// parameter.
    ///
    /// Fails immediately with [`ChatError::AuthMissing`] when no credential
    /// is supplied, performing no network action. On success the `Opened`
    /// event has already been emitted on `events`, and read/write tasks are
    /// running; all further lifecycle flows through `events`.
    pub async fn connect(
        ws_url: &str,
        credential: Option<&str>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, ChatError> {
        let token = match credential {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ChatError::AuthMissing),
        };

        let mut url = Url::parse(ws_url)
            .map_err(|e| ChatError::Transport(format!("invalid websocket url: {e}")))?;
        url.query_pairs_mut().append_pair("token", token);

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        info!(url = ws_url, "websocket connected");

        let opened = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = unbounded();
        let _ = events.send(TransportEvent::Opened);

        let (write, read) = ws_stream.split();
        spawn_read_task(read, events, opened.clone());
        spawn_write_task(write, receiver);

        Ok(Self {
            sender,
            opened,
            closed: AtomicBool::new(false),
        })
    }

    /// Whether the transport has opened and not yet closed.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Publish a frame to a destination.
    ///
    /// Fails with [`ChatError::NotConnected`] after the transport closed;
    /// frames are never queued here, buffering is caller policy.
    pub fn publish(&self, destination: &str, frame: ClientFrame) -> Result<(), ChatError> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        self.sender
            .unbounded_send((destination.to_string(), WsEnvelope::new(frame)))
            .map_err(|_| ChatError::Transport("outbound channel closed".to_string()))
    }

    /// Register a server-side subscription to a destination (the per-user
    /// message queue).
    pub fn subscribe(&self, destination: &str) -> Result<(), ChatError> {
        self.publish(
            destination,
            ClientFrame::Subscribe {
                destination: destination.to_string(),
            },
        )
    }

    /// Close the connection. Idempotent: calling this on an already-closed
    /// adapter is a no-op.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.opened.store(false, Ordering::SeqCst);
        // Dropping the channel lets the write task flush a close frame.
        self.sender.close_channel();
        info!("websocket disconnect requested");
    }

    #[cfg(test)]
    fn stub(open: bool) -> (Self, UnboundedReceiver<(String, WsEnvelope<ClientFrame>)>) {
        let (sender, receiver) = unbounded();
        let conn = Self {
            sender,
            opened: Arc::new(AtomicBool::new(open)),
            closed: AtomicBool::new(false),
        };
        (conn, receiver)
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

fn spawn_read_task(
    mut read: WsSource,
    events: mpsc::UnboundedSender<TransportEvent>,
    opened: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut reported = false;
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    match serde_json::from_str::<WsEnvelope<ServerFrame>>(&text) {
                        Ok(envelope) => {
                            let _ = events.send(TransportEvent::Frame(envelope));
                        }
                        Err(e) => warn!(error = %e, "dropping unparseable frame"),
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    info!(?code, "websocket received close frame");
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    reported = true;
                    break;
                }
                Ok(WsMessage::Ping(_)) => {
                    // pong handled by tungstenite
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    reported = true;
                    break;
                }
            }
        }
        opened.store(false, Ordering::SeqCst);
        if !reported {
            // Stream ended without a close frame, e.g. the socket dropped.
            let _ = events.send(TransportEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            });
        }
    });
}

fn spawn_write_task(
    mut write: WsSink,
    mut receiver: UnboundedReceiver<(String, WsEnvelope<ClientFrame>)>,
) {
    tokio::spawn(async move {
        while let Some((destination, envelope)) = receiver.next().await {
            let frame = OutboundFrame {
                destination: &destination,
                envelope: &envelope,
            };
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    debug!(destination = %destination, "publishing frame");
                    if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                        warn!(error = %e, "websocket send failed");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize outbound frame"),
            }
        }
        let _ = write.send(WsMessage::Close(None)).await;
    });
}
