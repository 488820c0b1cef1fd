//! Per-source state stored in the registry

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::source::{ClientId, DeliveryMode};
use crate::media::{CodecData, Packet};

/// Entry for a single source in the registry
pub struct SourceEntry {
    /// Delivery modes this source may be served with
    pub modes: HashSet<DeliveryMode>,

    /// Track descriptions; `None` until the source has reported them
    pub codecs: Option<Vec<CodecData>>,

    /// One channel per subscriber
    clients: HashMap<ClientId, mpsc::Sender<Packet>>,

    /// Packets dropped because a subscriber's channel was full
    pub dropped_packets: u64,

    /// When the source was registered
    pub created_at: Instant,
}

impl SourceEntry {
    pub(super) fn new(modes: HashSet<DeliveryMode>) -> Self {
        Self {
            modes,
            codecs: None,
            clients: HashMap::new(),
            dropped_packets: 0,
            created_at: Instant::now(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub(super) fn add_client(&mut self, capacity: usize) -> (ClientId, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ClientId::new();
        self.clients.insert(id, tx);
        (id, rx)
    }

    pub(super) fn remove_client(&mut self, id: &ClientId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Deliver a packet to every subscriber without waiting
    ///
    /// Full channels drop the packet for that subscriber; closed channels
    /// (receiver gone) are pruned. Returns the number of deliveries.
    pub(super) fn fan_out(&mut self, packet: &Packet) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for (id, tx) in &self.clients {
            match tx.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dropped += 1,
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.clients.remove(&id);
        }
        self.dropped_packets += dropped;

        delivered
    }
}

/// Statistics for a source
#[derive(Debug, Clone)]
pub struct SourceStats {
    /// Number of subscribers
    pub client_count: usize,
    /// Whether codec descriptions are known
    pub has_codecs: bool,
    /// Packets dropped for slow subscribers
    pub dropped_packets: u64,
    /// Time since registration
    pub age: std::time::Duration,
}
