//! The Websocket Event Adapter.
//!
//! Wraps a `tokio-tungstenite` websocket so that every transport callback —
//! connect, disconnect, error, message — is delivered as exactly one tagged
//! [`ShardEvent`] onto the shard's `eventCh`. The adapter never inspects
//! payload contents; decoding is the state machine's job.
//!
//! Grounded on `gateway/src/shard/connect.rs` and
//! `gateway/src/shard/processor/socket_forwarder.rs`: a background task owns
//! the stream so the shard's main loop never blocks directly on transport
//! I/O, only on the channel the task forwards onto.

use super::state::ShardEvent;
use futures_util::{SinkExt, StreamExt};
use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type ShardStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connecting the websocket transport failed.
#[derive(Debug)]
pub struct ConnectingError {
    kind: ConnectingErrorType,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ConnectingError {
    fn parsing_url(url: &str, source: url::ParseError) -> Self {
        Self {
            kind: ConnectingErrorType::ParsingUrl { url: url.to_owned() },
            source: Some(Box::new(source)),
        }
    }

    fn establishing(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self {
            kind: ConnectingErrorType::Establishing,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for ConnectingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConnectingErrorType::Establishing => f.write_str("failed to establish the connection"),
            ConnectingErrorType::ParsingUrl { url } => {
                write!(f, "the gateway url `{url}` is invalid")
            }
        }
    }
}

impl StdError for ConnectingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn StdError + 'static))
    }
}

/// Type of [`ConnectingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectingErrorType {
    /// The transport handshake itself failed.
    Establishing,
    /// The gateway URL couldn't be parsed.
    ParsingUrl {
        /// The URL that failed to parse.
        url: String,
    },
}

/// A handle to a live websocket connection.
///
/// Dropping this without calling [`Websocket::close`] simply abandons the
/// forwarder task's outbound sender; the task notices on its next send
/// attempt and exits.
#[derive(Debug)]
pub struct Websocket {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Websocket {
    /// Send a raw text frame (an `Identify`, `Resume`, or `Heartbeat` frame
    /// already serialized to JSON).
    pub fn send_text(&self, text: String) {
        if self.outbound.send(Message::Text(text)).is_err() {
            tracing::debug!("dropping send on a closed websocket");
        }
    }

    /// Initiate a normal close. Exceptions here are logged
    /// and swallowed — reconnection must never fail because of a close
    /// error.
    pub fn close(&self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };

        if self.outbound.send(Message::Close(Some(frame))).is_err() {
            tracing::debug!("close on an already-closed websocket, ignoring");
        }
    }
}

/// Open a websocket connection and start forwarding its events onto
/// `event_tx`.
///
/// `buffer_size` bounds both the max text and max binary message size the
/// transport will accept, matching the documented default of 4 MiB.
pub async fn connect(
    buffer_size: usize,
    url: &str,
    event_tx: mpsc::Sender<ShardEvent>,
) -> Result<Websocket, ConnectingError> {
    let parsed = url::Url::parse(url).map_err(|source| ConnectingError::parsing_url(url, source))?;

    let config = WebSocketConfig {
        max_message_size: Some(buffer_size),
        max_frame_size: Some(buffer_size),
        ..WebSocketConfig::default()
    };

    // `tokio-tungstenite`'s rustls connector verifies the endpoint's
    // hostname against its certificate by default; there is no separate
    // knob to turn HTTPS identity checking on.
    let (stream, _response) = tokio_tungstenite::connect_async_with_config(parsed, Some(config), false)
        .await
        .map_err(ConnectingError::establishing)?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(forward(stream, outbound_rx, event_tx));

    Ok(Websocket { outbound: outbound_tx })
}

async fn forward(
    mut stream: ShardStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    event_tx: mpsc::Sender<ShardEvent>,
) {
    if event_tx.send(ShardEvent::Connect).await.is_err() {
        tracing::debug!("shard event channel closed before connect could be delivered");
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else {
                    tracing::debug!("outbound handle dropped, closing websocket");
                    let _ = stream.close(None).await;
                    return;
                };

                let is_close = matches!(message, Message::Close(_));

                if let Err(source) = stream.send(message).await {
                    tracing::warn!("failed to send over websocket: {source}");
                    let _ = event_tx.send(ShardEvent::Error { message: source.to_string().into() }).await;
                }

                if is_close {
                    return;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(ShardEvent::Message { text: text.into() }).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, msg) = frame.map_or((1000, None), |f| {
                            (u16::from(f.code), Some(f.reason.to_string().into_boxed_str()))
                        });
                        let _ = event_tx.send(ShardEvent::Disconnect { code, msg }).await;
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary/Frame: not meaningful to the gateway
                        // protocol at this layer, and tungstenite answers
                        // pings automatically.
                    }
                    Some(Err(source)) => {
                        let _ = event_tx.send(ShardEvent::Error { message: source.to_string().into() }).await;
                    }
                    None => {
                        let _ = event_tx
                            .send(ShardEvent::Disconnect { code: 1006, msg: Some("stream ended".into()) })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}
