//! Session state machine
//!
//! Tracks a client session from admission to termination.

use std::time::{Duration, Instant};

use crate::registry::SourceId;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connection accepted, not yet subscribed
    Admitted,
    /// Subscribed to the source
    Registered,
    /// Header and init segment delivered
    Initialized,
    /// First keyframe seen, fragments flowing
    Streaming,
    /// Session over
    Terminated,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Source the session is bound to
    pub source: SourceId,

    /// Current phase
    pub phase: SessionPhase,

    /// When the session was admitted
    pub started_at: Instant,

    /// When the first keyframe was forwarded
    pub streaming_since: Option<Instant>,
}

impl SessionState {
    pub fn new(id: u64, source: SourceId) -> Self {
        Self {
            id,
            source,
            phase: SessionPhase::Admitted,
            started_at: Instant::now(),
            streaming_since: None,
        }
    }

    pub fn on_registered(&mut self) {
        if self.phase == SessionPhase::Admitted {
            self.phase = SessionPhase::Registered;
        }
    }

    pub fn on_initialized(&mut self) {
        if self.phase == SessionPhase::Registered {
            self.phase = SessionPhase::Initialized;
        }
    }

    /// First keyframe reached the muxer
    pub fn on_streaming(&mut self) {
        if self.phase == SessionPhase::Initialized {
            self.phase = SessionPhase::Streaming;
            self.streaming_since = Some(Instant::now());
        }
    }

    /// Terminate from any phase
    pub fn terminate(&mut self) {
        self.phase = SessionPhase::Terminated;
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == SessionPhase::Streaming
    }

    /// Time since admission
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}
