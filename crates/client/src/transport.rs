//! Duplex text transport behind the session.
//!
//! `Connector` opens one connection per call. The session only ever sees a
//! stream of inbound text frames and a sink for outbound ones; the stream
//! ending means the peer closed.

use std::pin::Pin;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{future, Sink, SinkExt, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Connection refused: {0}")]
    Refused(String),
}

pub type IncomingFrames = BoxStream<'static, Result<String, TransportError>>;
pub type OutgoingFrames = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// One established connection
pub struct Transport {
    pub incoming: IncomingFrames,
    pub outgoing: OutgoingFrames,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

/// Production connector over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Transport, TransportError>> {
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (sink, stream) = socket.split();

            let incoming = stream
                .map_err(TransportError::from)
                .try_take_while(|msg| future::ready(Ok(!matches!(msg, Message::Close(_)))))
                .try_filter_map(|msg| {
                    future::ready(Ok(match msg {
                        Message::Text(text) => Some(text.as_str().to_owned()),
                        other => {
                            debug!(
                                component = "transport",
                                event = "ws.frame.ignored",
                                kind = frame_kind(&other),
                                "Ignoring non-text frame"
                            );
                            None
                        }
                    }))
                })
                .boxed();

            let outgoing = sink.with(|text: String| {
                future::ready(Ok::<_, TransportError>(Message::text(text)))
            });

            Ok(Transport {
                incoming,
                outgoing: Box::pin(outgoing),
            })
        })
    }
}

fn frame_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
