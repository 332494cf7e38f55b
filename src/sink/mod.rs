//! Audio output sinks.

pub mod pcm_sink;

use thiserror::Error;

use crate::packet::{AudioFormat, AudioPacket, PacketInfo};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no output device available")]
    NoDevice,
    #[error("device does not support format {0:?}")]
    UnsupportedFormat(AudioFormat),
    #[error("device error: {0}")]
    Device(String),
}

/// Result of handing a slice of one packet's bytes to the sink.
pub struct AddPacketResult {
    /// How many bytes, starting at the `offset` passed in, were accepted.
    /// `0` means the device is applying back-pressure; the caller should
    /// retry the same offset shortly rather than treat this as an error.
    pub bytes_consumed: usize,
    /// The packet currently audible at the device, if playback has reached
    /// that point. Used to drive published position/track state.
    pub playing: Option<PacketInfo>,
}

pub enum DrainResult {
    /// Buffered audio is still playing; reports whichever packet is
    /// currently audible, if determinable.
    Playing(Option<PacketInfo>),
    /// The device has fully played out everything handed to it.
    Done,
}

/// An audio output device, driven by the transport's sink-thread.
///
/// The contract mirrors a blocking period-oriented ALSA write loop: `start`
/// opens the device for a format, `add_packet` is called repeatedly with
/// increasing `offset` until a packet's bytes are all consumed, and `drain`
/// is polled after the stream ends until the device's internal buffer has
/// actually finished playing.
pub trait Sink: Send {
    fn start(&mut self, format: AudioFormat) -> Result<(), SinkError>;

    /// Accept bytes from `packet.data()[offset..]`. Implementations must
    /// make progress or return `Err`; returning `Ok` with `bytes_consumed ==
    /// 0` repeatedly is a valid way to apply back-pressure but must resolve
    /// once the device frees buffer space.
    fn add_packet(&mut self, packet: &AudioPacket, offset: usize) -> Result<AddPacketResult, SinkError>;

    /// Request the device pause. Returns whether the device actually
    /// paused; the caller only reports PAUSE state if this is true.
    fn pause(&mut self) -> bool;

    fn resume(&mut self);

    /// Stop playback immediately, discarding any buffered audio.
    fn stop(&mut self);

    /// Poll during DRAINING: has the last packet's bytes actually been
    /// played out yet?
    fn drain(&mut self) -> Result<DrainResult, SinkError>;
}
