//! Audio sources: disc playback and internet radio, behind one trait so the
//! transport never needs to know which it's driving.

pub mod disc;
pub mod radio;

use thiserror::Error;

use crate::packet::AudioPacket;
use crate::transport::context::ContextClock;
use crate::transport::state::PlayerState;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected end of file in {path}, expected at least {remaining} more bytes")]
    UnexpectedEof { path: String, remaining: usize },
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("decoding stream: {0}")]
    Decode(String),
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
}

/// What a [`Source`] produced for one polling step of the source-thread.
pub enum SourceEvent {
    Packet(AudioPacket),
    /// Nothing ready yet; the caller should check the context and poll
    /// again rather than treat this as the end of the stream.
    Pending,
    EndOfStream,
}

/// A source of audio packets driven by the transport's source-thread.
///
/// `next_source`/`prev_source`/`pausable` take `&self` so the transport's
/// command thread can query them without contending with an in-progress
/// `next_event` call for more than the duration of one lock; `start` and
/// `next_event` carry the iteration cursor and so need `&mut self`.
pub trait Source: Send {
    /// State to publish the moment this source is installed, before any
    /// packet has reached the sink.
    fn initial_state(&self, previous: &PlayerState) -> PlayerState;

    /// Whether `pause` is meaningful for this source (disc: yes, radio: no).
    fn pausable(&self) -> bool;

    /// Called when the transport leaves this source for STOP, distinct from
    /// simply reaching end of stream. Discs use it to forget any remembered
    /// mid-disc resume point.
    fn stopped(&mut self);

    /// External hook a deployment's watchdog can use to force a source into
    /// "known bad, restart from scratch" rather than the source's normal
    /// transient-error recovery. Unused by discs.
    fn stalled(&self) -> bool {
        false
    }

    /// Build the source that `next`/`prev` should switch to, or `None` if
    /// there is nothing to advance to (the transport then stops).
    fn next_source(&self, state: &PlayerState) -> Option<Box<dyn Source>>;
    fn prev_source(&self, state: &PlayerState) -> Option<Box<dyn Source>>;

    /// Track (0-based play order) this freshly built source should be
    /// started at. Installed sources from `next_source`/`prev_source`
    /// already carry this internally; the transport reads it once before
    /// its first `start` call.
    fn resume_track(&self) -> u32 {
        0
    }

    /// (Re)position the source at `start_track` (a 0-based play-order
    /// index) before the first call to `next_event`.
    fn start(&mut self, start_track: u32);

    /// Produce the next packet, or report that the caller should poll again
    /// shortly, or that the stream has ended. `ctx` lets long-running
    /// sources sleep in a way that wakes promptly on a disruptive command.
    fn next_event(&mut self, ctx: &ContextClock, context: u64) -> Result<SourceEvent, SourceError>;
}
