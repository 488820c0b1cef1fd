//! Disconnect watcher
//!
//! Reads the inbound half of the connection on its own task so the forward
//! loop can block on packets and still notice a departing peer.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::transport::{InboundMessage, MessageStream};

/// Why the peer is considered gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// Close frame or end of stream
    Closed,
    /// Read error on the inbound half
    ReadFailed(TransportError),
}

/// Handle to a running watcher task
///
/// Dropping the handle aborts the task.
pub struct DisconnectWatcher {
    signal: oneshot::Receiver<Disconnect>,
    task: JoinHandle<()>,
}

impl DisconnectWatcher {
    /// Start watching `stream`
    pub fn spawn<S: MessageStream>(mut stream: S) -> Self {
        let (tx, signal) = oneshot::channel();

        let task = tokio::spawn(async move {
            let disconnect = loop {
                match stream.recv().await {
                    Some(Ok(InboundMessage::Close)) | None => break Disconnect::Closed,
                    Some(Ok(InboundMessage::Data(_) | InboundMessage::Control)) => continue,
                    Some(Err(e)) => break Disconnect::ReadFailed(e),
                }
            };

            tracing::debug!(signal = ?disconnect, "Disconnect detected");
            // Receiver is gone if the session already ended
            let _ = tx.send(disconnect);
        });

        Self { signal, task }
    }

    /// Wait for the disconnect signal
    ///
    /// Cancel safe. Must not be awaited again after it has returned.
    pub async fn wait(&mut self) -> Disconnect {
        // A watcher that died without signalling is treated as a close
        (&mut self.signal).await.unwrap_or(Disconnect::Closed)
    }
}

impl Drop for DisconnectWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
