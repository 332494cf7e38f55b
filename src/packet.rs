//! Audio packet and format types shared by sources, the packetiser and sinks.

use bytes::Bytes;

use crate::disc::DiscId;

/// PCM format of the samples carried in an [`AudioPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub big_endian: bool,
}

impl AudioFormat {
    pub const CDDA: AudioFormat = AudioFormat {
        rate: 44100,
        channels: 2,
        bits_per_sample: 16,
        big_endian: true,
    };

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }
}

/// A single flag bit today, but kept as its own type rather than a bare
/// `bool` since the original format has room for more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    pub const PAUSE_AFTER: PacketFlags = PacketFlags(0x01);

    pub fn contains(&self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;
    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

/// A quantum of audio handed from a [`crate::source::Source`] to the sink,
/// by way of the transport's queue.
///
/// `data` is `None` for descriptors produced by the [`crate::packetiser::Packetiser`]
/// before a source has filled in the bytes (or, for the silence-filling
/// pregap case, before the source has decided whether to fill zeros).
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub disc_id: DiscId,
    /// 1-based track number, matching `Track::number`.
    pub track: u32,
    /// 0-based position of this track within the current play order.
    pub track_number_in_play_order: u32,
    pub no_tracks: u32,
    pub index: u32,
    pub abs_pos: u64,
    pub rel_pos: i64,
    /// Length of this packet in frames.
    pub length: u32,
    /// Byte offset into the track's data file, or `None` for a pregap
    /// silence packet that has no backing bytes.
    pub file_pos: Option<u64>,
    pub flags: PacketFlags,
    pub data: Option<Bytes>,
    pub format: AudioFormat,
    /// Stamped by the transport's source-thread when the packet is handed
    /// off, so the sink-thread can recognise stale packets after a
    /// disruptive command.
    pub context: u64,
}

impl AudioPacket {
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map(Bytes::len).unwrap_or(0)
    }

    pub fn info(&self) -> PacketInfo {
        PacketInfo {
            context: self.context,
            disc_id: self.disc_id.clone(),
            track: self.track,
            track_number_in_play_order: self.track_number_in_play_order,
            no_tracks: self.no_tracks,
            index: self.index,
            rel_pos: self.rel_pos,
            length: self.length,
            rate: self.format.rate,
            flags: self.flags,
        }
    }
}

/// A lightweight snapshot of an [`AudioPacket`]'s position fields, reported
/// back by a sink as it consumes packet bytes, without needing to hand the
/// packet's audio data back across the sink/transport boundary.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub context: u64,
    pub disc_id: DiscId,
    pub track: u32,
    pub track_number_in_play_order: u32,
    pub no_tracks: u32,
    pub index: u32,
    pub rel_pos: i64,
    pub length: u32,
    pub rate: u32,
    pub flags: PacketFlags,
}

impl PacketInfo {
    /// Whole seconds into the track, truncating towards zero. Pregap
    /// positions (`rel_pos < 0`) are reported as `0` rather than negative,
    /// matching how most front ends display "track not yet started".
    pub fn position_seconds(&self) -> i64 {
        if self.rel_pos < 0 {
            0
        } else {
            self.rel_pos / self.rate as i64
        }
    }
}
