//! Message-oriented client transport
//!
//! A connection is used as two independent halves: the client session owns
//! the [`MessageSink`] and writes fragments, while the disconnect watcher
//! owns the [`MessageStream`] and blocks on reads. Neither half needs to
//! lock the other.

pub mod ws;

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::error::TransportError;

pub use ws::{split_socket, WsSink, WsStream};

/// Message received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Application data (text or binary); the relay ignores its content
    Data(Bytes),
    /// Ping/pong keepalive
    Control,
    /// Peer initiated close
    Close,
}

/// Outbound half of a connection
pub trait MessageSink: Send {
    /// Send one binary message
    fn send_binary(
        &mut self,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection; best effort
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Inbound half of a connection
pub trait MessageStream: Send + 'static {
    /// Wait for the next message; `None` once the connection is gone
    fn recv(
        &mut self,
    ) -> impl Future<Output = Option<Result<InboundMessage, TransportError>>> + Send;
}

/// Send a binary message, failing with [`TransportError::Timeout`] if it
/// does not complete within `deadline`
pub async fn send_with_deadline<S: MessageSink>(
    sink: &mut S,
    payload: Bytes,
    deadline: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(deadline, sink.send_binary(payload)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}
