//! Client session
//!
//! Drives one connection from admission to teardown:
//!
//! ```text
//! admit ──► register ──► fetch codecs ──► initialize ──► forward ──► teardown
//!   │          │              │                │            │
//!   └──────────┴──────────────┴────────────────┴────────────┴──► close sink
//! ```
//!
//! Nothing is written before both initialization messages have gone out,
//! no packet reaches the muxer before the first keyframe, and the
//! subscription is released exactly once on every exit path past
//! registration.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::config::SessionConfig;
use super::state::{SessionPhase, SessionState};
use super::subscription::Subscription;
use super::watcher::{Disconnect, DisconnectWatcher};
use super::{SessionEnd, SessionError};
use crate::media::{CodecData, Packet};
use crate::mux::{Muxer, MuxerFactory};
use crate::registry::{SourceId, SourceRegistry};
use crate::stats::SessionStats;
use crate::transport::{send_with_deadline, MessageSink, MessageStream};

/// Tag byte prefixed to the header message
pub const HEADER_TAG: u8 = 0x09;

/// One client connection bound to one source
pub struct ClientSession<R: SourceRegistry, F: MuxerFactory> {
    registry: Arc<R>,
    muxers: Arc<F>,
    config: SessionConfig,
    state: SessionState,
    stats: SessionStats,
    /// Indices of the video tracks in the codec list
    video_tracks: Vec<usize>,
}

impl<R: SourceRegistry, F: MuxerFactory> ClientSession<R, F> {
    pub fn new(
        id: u64,
        source: SourceId,
        registry: Arc<R>,
        muxers: Arc<F>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            muxers,
            config,
            state: SessionState::new(id, source),
            stats: SessionStats::new(),
            video_tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run the session to completion
    ///
    /// The sink is always closed before this returns, waiting at most the
    /// init write deadline for a stalled peer. Errors end only this session;
    /// callers typically just log them.
    pub async fn run<S, T>(&mut self, mut sink: S, stream: T) -> Result<SessionEnd, SessionError>
    where
        S: MessageSink,
        T: MessageStream,
    {
        let result = self.serve(&mut sink, stream).await;

        let close_deadline = self.config.init_write_timeout;
        if tokio::time::timeout(close_deadline, sink.close()).await.is_err() {
            tracing::debug!(session_id = self.state.id, "Sink close timed out");
        }
        self.state.terminate();
        self.stats.duration = self.state.duration();

        match &result {
            Ok(end) => tracing::info!(
                session_id = self.state.id,
                source = %self.state.source,
                end = ?end,
                fragments = self.stats.fragments_sent,
                bytes = self.stats.bytes_sent,
                bitrate = self.stats.bitrate(),
                skipped = self.stats.packets_skipped,
                "Session ended"
            ),
            Err(SessionError::SourceNotEligible(_)) => tracing::debug!(
                session_id = self.state.id,
                source = %self.state.source,
                mode = %self.config.delivery_mode,
                "Source not available for delivery mode"
            ),
            Err(e) => tracing::info!(
                session_id = self.state.id,
                source = %self.state.source,
                error = %e,
                fragments = self.stats.fragments_sent,
                "Session ended with error"
            ),
        }

        result
    }

    async fn serve<S, T>(&mut self, sink: &mut S, stream: T) -> Result<SessionEnd, SessionError>
    where
        S: MessageSink,
        T: MessageStream,
    {
        let source = self.state.source;

        if !self.admit(&source).await {
            return Err(SessionError::SourceNotEligible(source));
        }

        let mut subscription = self.register(source).await?;
        let result = self.stream_to(&mut subscription, sink, stream).await;
        subscription.release().await;

        result
    }

    /// Check that the source exists and allows this session's delivery mode
    pub async fn admit(&self, source: &SourceId) -> bool {
        self.registry
            .exists_with_type(source, self.config.delivery_mode)
            .await
    }

    /// Subscribe to the source
    pub async fn register(&mut self, source: SourceId) -> Result<Subscription<R>, SessionError> {
        let subscription = Subscription::acquire(Arc::clone(&self.registry), source)
            .await
            .map_err(SessionError::RegistrationFailed)?;

        self.state.on_registered();
        tracing::info!(
            session_id = self.state.id,
            source = %source,
            client = ?subscription.client(),
            "Session registered"
        );

        Ok(subscription)
    }

    /// Fetch the source's codec descriptions; absent or empty codecs end the session
    pub async fn fetch_codec(&self, source: &SourceId) -> Result<Vec<CodecData>, SessionError> {
        match self.registry.codecs(source).await {
            Ok(Some(codecs)) if !codecs.is_empty() => Ok(codecs),
            Ok(_) => Err(SessionError::CodecNotReady(*source)),
            Err(e) => Err(SessionError::CodecFetchFailed(e)),
        }
    }

    /// Build a muxer and send the tagged header then the init segment
    pub async fn initialize<S: MessageSink>(
        &mut self,
        codecs: &[CodecData],
        sink: &mut S,
    ) -> Result<F::Muxer, SessionError> {
        let mut muxer = self.muxers.new_muxer();
        muxer
            .write_header(codecs)
            .map_err(SessionError::MuxInitFailed)?;
        let init = muxer.init(codecs).map_err(SessionError::MuxInitFailed)?;

        let mut header = BytesMut::with_capacity(1 + init.header.len());
        header.put_u8(HEADER_TAG);
        header.extend_from_slice(&init.header);

        let deadline = self.config.init_write_timeout;
        self.send(sink, header.freeze(), deadline).await?;
        self.send(sink, init.segment, deadline).await?;

        self.video_tracks = codecs
            .iter()
            .enumerate()
            .filter(|(_, codec)| codec.is_video())
            .map(|(track, _)| track)
            .collect();
        self.state.on_initialized();
        tracing::debug!(
            session_id = self.state.id,
            tracks = codecs.len(),
            "Session initialized"
        );

        Ok(muxer)
    }

    async fn stream_to<S, T>(
        &mut self,
        subscription: &mut Subscription<R>,
        sink: &mut S,
        stream: T,
    ) -> Result<SessionEnd, SessionError>
    where
        S: MessageSink,
        T: MessageStream,
    {
        let codecs = self.fetch_codec(subscription.source()).await?;
        let mut muxer = self.initialize(&codecs, sink).await?;

        let mut watcher = DisconnectWatcher::spawn(stream);
        self.forward(&mut muxer, subscription, &mut watcher, sink)
            .await
    }

    /// Forward packets until the peer leaves, the source closes, or a write fails
    ///
    /// A pending disconnect always wins over a pending packet. When the source
    /// carries video, only a video keyframe starts the stream.
    pub async fn forward<S: MessageSink>(
        &mut self,
        muxer: &mut F::Muxer,
        subscription: &mut Subscription<R>,
        watcher: &mut DisconnectWatcher,
        sink: &mut S,
    ) -> Result<SessionEnd, SessionError> {
        let mut armed = false;

        loop {
            let packet = tokio::select! {
                biased;

                disconnect = watcher.wait() => {
                    tracing::debug!(
                        session_id = self.state.id,
                        signal = ?disconnect,
                        "Peer disconnected"
                    );
                    return Ok(match disconnect {
                        Disconnect::Closed => SessionEnd::PeerDisconnected,
                        Disconnect::ReadFailed(e) => SessionEnd::ReadFailed(e),
                    });
                }

                packet = subscription.recv() => match packet {
                    Some(packet) => packet,
                    None => return Ok(SessionEnd::SourceClosed),
                },
            };

            self.stats.packets_received += 1;

            if !armed && self.opens_stream(&packet) {
                armed = true;
                self.state.on_streaming();
                tracing::debug!(session_id = self.state.id, "First keyframe, streaming");
            }

            if !armed {
                self.stats.packets_skipped += 1;
                continue;
            }

            let fragment = match muxer.write_packet(&packet, false) {
                Ok(fragment) => fragment,
                Err(e) => {
                    self.stats.mux_errors += 1;
                    tracing::warn!(
                        session_id = self.state.id,
                        track = packet.track,
                        error = %e,
                        "Packet rejected by muxer"
                    );
                    continue;
                }
            };
            self.stats.packets_muxed += 1;

            if let Some(fragment) = fragment {
                let deadline = self.config.fragment_write_timeout;
                self.send(sink, fragment, deadline).await?;
                self.stats.fragments_sent += 1;
            }
        }
    }

    fn opens_stream(&self, packet: &Packet) -> bool {
        packet.is_keyframe
            && (self.video_tracks.is_empty() || self.video_tracks.contains(&packet.track))
    }

    async fn send<S: MessageSink>(
        &mut self,
        sink: &mut S,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<(), SessionError> {
        let len = payload.len() as u64;
        send_with_deadline(sink, payload, deadline)
            .await
            .map_err(SessionError::TransportWriteFailed)?;
        self.stats.bytes_sent += len;
        Ok(())
    }
}
