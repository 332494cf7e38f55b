//! Player and rip state snapshots, and the fan-out broadcaster that
//! publishes them to external subscribers.

use serde::{Deserialize, Serialize};

use crate::disc::DiscId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateTag {
    Off,
    NoDisc,
    Working,
    Play,
    Pause,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub state: StateTag,
    pub disc_id: Option<DiscId>,
    pub source_disc_id: Option<DiscId>,
    pub stream_name: Option<String>,
    /// 1-based track number, 0 while no track is current.
    pub track: u32,
    pub no_tracks: u32,
    pub index: u32,
    pub position_seconds: i64,
    pub length_seconds: i64,
    pub error: Option<String>,
}

impl PlayerState {
    pub fn off() -> Self {
        PlayerState {
            state: StateTag::Off,
            disc_id: None,
            source_disc_id: None,
            stream_name: None,
            track: 0,
            no_tracks: 0,
            index: 0,
            position_seconds: 0,
            length_seconds: 0,
            error: None,
        }
    }

    pub fn no_disc() -> Self {
        PlayerState {
            state: StateTag::NoDisc,
            ..PlayerState::off()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RipTag {
    Inactive,
    Audio,
    Toc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RipState {
    pub state: RipTag,
    pub disc_id: Option<DiscId>,
    /// 0-100, present while `state != Inactive`.
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl RipState {
    pub fn inactive() -> Self {
        RipState {
            state: RipTag::Inactive,
            disc_id: None,
            progress: None,
            error: None,
        }
    }
}

/// Publishes player and rip state changes to whatever external transport
/// (message bus, REST push, LCD display...) a deployment wires up. The
/// transport core itself only depends on this trait.
pub trait StateBroadcaster: Send + Sync {
    fn publish_state(&self, state: PlayerState);
    fn publish_rip_state(&self, rip: RipState);
}

/// A `StateBroadcaster` that simply keeps the latest snapshot of each kind
/// in memory for polling subscribers, with no external fan-out. Useful for
/// tests and as the default when nothing else is configured.
#[derive(Default)]
pub struct LocalStateBroadcaster {
    state: std::sync::Mutex<PlayerState>,
    rip: std::sync::Mutex<RipState>,
}

impl LocalStateBroadcaster {
    pub fn new() -> Self {
        LocalStateBroadcaster {
            state: std::sync::Mutex::new(PlayerState::off()),
            rip: std::sync::Mutex::new(RipState::inactive()),
        }
    }

    pub fn current_state(&self) -> PlayerState {
        self.state.lock().unwrap().clone()
    }

    pub fn current_rip_state(&self) -> RipState {
        self.rip.lock().unwrap().clone()
    }
}

impl StateBroadcaster for LocalStateBroadcaster {
    fn publish_state(&self, state: PlayerState) {
        *self.state.lock().unwrap() = state;
    }

    fn publish_rip_state(&self, rip: RipState) {
        *self.rip.lock().unwrap() = rip;
    }
}
