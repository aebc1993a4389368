//! WebSocket transport.
//!
//! A [`Connector`] opens one socket and hands back a [`SocketLink`]: a pair
//! of channels plus a cancellation token. A background pump task owns the
//! socket itself, writing queued text frames and forwarding inbound frames
//! as [`SocketEvent`]s. Reconnection policy lives one layer up, in the
//! connection manager; this module only knows how to open and pump a
//! single socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use stationlink_api::{Connector, SocketEvent, WebSocketConnector};
//! use url::Url;
//!
//! let url = Url::parse("ws://10.200.0.184:8765")?;
//! let mut link = WebSocketConnector.connect(&url).await?;
//! link.outbound.send(r#"{"type":"subscribe","id_maquina":7}"#.into())?;
//!
//! while let Some(event) = link.inbound.recv().await {
//!     if let SocketEvent::Text(text) = event {
//!         println!("{text}");
//!     }
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

/// Future returned by [`Connector::connect`].
pub type SocketFuture = BoxFuture<'static, Result<SocketLink, Error>>;

/// Opens sockets. The seam the connection manager is tested through.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> SocketFuture;
}

// ── SocketLink ───────────────────────────────────────────────────────

/// Handle to one open socket.
///
/// Dropping `outbound` closes the socket gracefully; cancelling `cancel`
/// closes it immediately. Either way the pump stops and `inbound` ends.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
    pub cancel: CancellationToken,
}

/// What the pump reports about the socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// The peer closed the socket, or the stream ended.
    Closed { code: Option<u16>, reason: String },
    /// The socket failed. No further events follow.
    Failed(Error),
}

// ── WebSocketConnector ───────────────────────────────────────────────

/// [`Connector`] backed by `tokio-tungstenite`. Accepts `ws://` and `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: &Url) -> SocketFuture {
        let url = url.clone();
        Box::pin(async move { open(url).await })
    }
}

async fn open(url: Url) -> Result<SocketLink, Error> {
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    }

    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!(url = %url, "WebSocket connected");

    Ok(spawn_link(ws_stream))
}

/// Wrap an already-upgraded stream in a [`SocketLink`] and start its pump.
pub fn spawn_link<S>(stream: WebSocketStream<S>) -> SocketLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    tokio::spawn(pump(stream, outbound_rx, event_tx, cancel.clone()));

    SocketLink {
        outbound: outbound_tx,
        inbound: event_rx,
        cancel,
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

async fn pump<S>(
    stream: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SocketEvent>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            text = outbound.recv() => {
                let Some(text) = text else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    let _ = events.send(SocketEvent::Failed(Error::WebSocketConnect(e.to_string())));
                    break;
                }
            }
            frame = read.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => SocketEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong itself
                        tracing::trace!("WebSocket ping");
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |cf| {
                            (Some(u16::from(cf.code)), cf.reason.as_str().to_owned())
                        });
                        tracing::info!(?code, %reason, "WebSocket close frame received");
                        let _ = events.send(SocketEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(SocketEvent::Failed(Error::WebSocketConnect(e.to_string())));
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        let _ = events.send(SocketEvent::Closed {
                            code: None,
                            reason: "stream ended".into(),
                        });
                        break;
                    }
                };

                if events.send(event).is_err() {
                    // nobody is listening anymore
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    tracing::debug!("WebSocket pump exiting");
}

// ── Tests ────────────────────────────────────────────────────────────
