//! WebSocket transport over axum
//!
//! Binary messages only go out; anything that comes in is reported to the
//! disconnect watcher, which only cares about close and errors.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{InboundMessage, MessageSink, MessageStream};
use crate::error::TransportError;

/// Outbound half of an upgraded WebSocket
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Inbound half of an upgraded WebSocket
pub struct WsStream {
    inner: SplitStream<WebSocket>,
}

/// Split an upgraded socket into its two halves
pub fn split_socket(socket: WebSocket) -> (WsSink, WsStream) {
    let (sink, stream) = socket.split();
    (WsSink { inner: sink }, WsStream { inner: stream })
}

impl MessageSink for WsSink {
    async fn send_binary(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(payload))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        // Either call fails if the peer is already gone; nothing to do then.
        let _ = self.inner.send(Message::Close(None)).await;
        let _ = self.inner.close().await;
    }
}

impl MessageStream for WsStream {
    async fn recv(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        let message = match self.inner.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };

        Some(Ok(match message {
            Message::Binary(data) => InboundMessage::Data(data),
            Message::Text(text) => {
                InboundMessage::Data(Bytes::copy_from_slice(text.as_str().as_bytes()))
            }
            Message::Ping(_) | Message::Pong(_) => InboundMessage::Control,
            Message::Close(_) => InboundMessage::Close,
        }))
    }
}
