//! Disc and track metadata, and the disc ID's two on-the-wire representations.

use base64_free_codec::{external_to_internal, internal_to_external};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscError {
    #[error("disc id {0:?} is not 28 characters")]
    BadExternalLength(String),
    #[error("disc id {0:?} is not valid base64")]
    BadExternalEncoding(String),
    #[error("disc id {0:?} is not 40 hex characters")]
    BadInternalFormat(String),
    #[error("disc has no tracks")]
    NoTracks,
    #[error("track {0} has zero length")]
    TrackEmpty(u32),
    #[error("track {0}: pregap_offset {1} exceeds track length {2}")]
    PregapOffsetOutOfRange(u32, u64, u64),
    #[error("track {0}: pregap_silence {1} exceeds pregap_offset {2}")]
    PregapSilenceOutOfRange(u32, u64, u64),
    #[error("track {0}: index entry {1} is out of [pregap_offset, length) range")]
    IndexOutOfRange(u32, u64),
    #[error("track {0}: file_offset + file_length exceeds data file size {1}")]
    FileRangeOutOfDisc(u32, u64),
}

/// A disc identity, kept in both of its conventional textual forms.
///
/// The external form is the 28-character MusicBrainz-style disc ID (base64
/// over a SHA-1 digest, using `.`, `_` and `-` in place of `+`, `/` and `=`).
/// The internal form is the same digest as 40 lowercase hex characters,
/// which is what the on-disk library layout keys off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiscId {
    internal: String,
}

impl TryFrom<String> for DiscId {
    type Error = DiscError;

    /// Accepts either textual form, so state snapshots read back from JSON
    /// round-trip regardless of which form was written.
    fn try_from(value: String) -> Result<Self, DiscError> {
        if value.len() == 40 {
            DiscId::from_internal(&value)
        } else {
            DiscId::from_external(&value)
        }
    }
}

impl From<DiscId> for String {
    fn from(id: DiscId) -> String {
        id.external()
    }
}

impl DiscId {
    /// Build from the 28-character external (MusicBrainz) form.
    pub fn from_external(external: &str) -> Result<Self, DiscError> {
        if external.len() != 28 {
            return Err(DiscError::BadExternalLength(external.to_string()));
        }
        let internal = external_to_internal(external)
            .ok_or_else(|| DiscError::BadExternalEncoding(external.to_string()))?;
        Ok(DiscId { internal })
    }

    /// Build from the 40-character internal (hex) form.
    pub fn from_internal(internal: &str) -> Result<Self, DiscError> {
        if internal.len() != 40 || !internal.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DiscError::BadInternalFormat(internal.to_string()));
        }
        Ok(DiscId {
            internal: internal.to_ascii_lowercase(),
        })
    }

    pub fn external(&self) -> String {
        internal_to_external(&self.internal)
    }

    pub fn internal(&self) -> &str {
        &self.internal
    }
}

impl std::fmt::Display for DiscId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.external())
    }
}

/// Index points and silence/pregap layout for a single track.
#[derive(Debug, Clone)]
pub struct Track {
    /// 1-based, matches position in `Disc::tracks`.
    pub number: u32,
    pub file_offset: u64,
    pub file_length: u64,
    /// Length of the track in frames, including its pregap.
    pub length: u64,
    /// Frame offset at which the track's own audio begins (i.e. where its
    /// pregap ends). Index 1 starts here.
    pub pregap_offset: u64,
    /// Frame offset below which the pregap is silence rather than backed by
    /// file data (used for the "hidden audio" pregap case).
    pub pregap_silence: u64,
    /// Extra index points beyond index 1, as frame offsets.
    pub index: Vec<u64>,
    pub pause_after: bool,
    /// Skipped tracks are omitted entirely from play order.
    pub skip: bool,
}

impl Track {
    fn validate(&self, data_file_size: u64) -> Result<(), DiscError> {
        if self.length == 0 {
            return Err(DiscError::TrackEmpty(self.number));
        }
        if self.pregap_offset > self.length {
            return Err(DiscError::PregapOffsetOutOfRange(
                self.number,
                self.pregap_offset,
                self.length,
            ));
        }
        if self.pregap_silence > self.pregap_offset {
            return Err(DiscError::PregapSilenceOutOfRange(
                self.number,
                self.pregap_silence,
                self.pregap_offset,
            ));
        }
        for &idx in &self.index {
            if idx < self.pregap_offset || idx >= self.length {
                return Err(DiscError::IndexOutOfRange(self.number, idx));
            }
        }
        if self.file_offset + self.file_length > data_file_size {
            return Err(DiscError::FileRangeOutOfDisc(self.number, data_file_size));
        }
        Ok(())
    }
}

/// A disc's full track layout, as read from the library's on-disk model.
#[derive(Debug, Clone)]
pub struct Disc {
    pub disc_id: DiscId,
    pub tracks: Vec<Track>,
    pub data_file_name: String,
    pub ripped_audio: bool,
    pub ripped_toc: bool,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl Disc {
    pub fn validate(&self, data_file_size: u64) -> Result<(), DiscError> {
        if self.tracks.is_empty() {
            return Err(DiscError::NoTracks);
        }
        for t in &self.tracks {
            t.validate(data_file_size)?;
        }
        Ok(())
    }

    /// Tracks in play order, i.e. `skip == false`, in ascending `number` order.
    pub fn play_order(&self) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.skip)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn no_tracks(&self) -> u32 {
        self.play_order().len() as u32
    }
}

/// Hand-rolled base64 variant used by the external disc ID form, swapping in
/// filesystem/URL-safe characters the same way the original MusicBrainz disc
/// ID encoding does, without pulling in a general-purpose base64 crate for a
/// single fixed-length encode/decode.
mod base64_free_codec {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    pub fn internal_to_external(internal: &str) -> String {
        let bytes = hex::decode(internal).expect("internal id already validated as hex");
        let mut out = String::with_capacity(28);
        for chunk in bytes.chunks(3) {
            let b0 = chunk[0] as u32;
            let b1 = *chunk.get(1).unwrap_or(&0) as u32;
            let b2 = *chunk.get(2).unwrap_or(&0) as u32;
            let n = (b0 << 16) | (b1 << 8) | b2;
            out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
            out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
            if chunk.len() > 1 {
                out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
            } else {
                out.push('=');
            }
            if chunk.len() > 2 {
                out.push(ALPHABET[(n & 0x3f) as usize] as char);
            } else {
                out.push('=');
            }
        }
        out.chars()
            .map(|c| match c {
                '+' => '.',
                '/' => '_',
                '=' => '-',
                c => c,
            })
            .collect()
    }

    pub fn external_to_internal(external: &str) -> Option<String> {
        let standard: String = external
            .chars()
            .map(|c| match c {
                '.' => '+',
                '_' => '/',
                '-' => '=',
                c => c,
            })
            .collect();
        let mut bytes = Vec::with_capacity(21);
        let chars: Vec<u8> = standard.bytes().collect();
        for chunk in chars.chunks(4) {
            let mut vals = [0u32; 4];
            let mut pad = 0;
            for (i, &c) in chunk.iter().enumerate() {
                if c == b'=' {
                    pad += 1;
                    vals[i] = 0;
                } else {
                    vals[i] = ALPHABET.iter().position(|&a| a == c)? as u32;
                }
            }
            let n = (vals[0] << 18) | (vals[1] << 12) | (vals[2] << 6) | vals[3];
            bytes.push((n >> 16) as u8);
            if pad < 2 {
                bytes.push((n >> 8) as u8);
            }
            if pad < 1 {
                bytes.push(n as u8);
            }
        }
        bytes.truncate(20);
        if bytes.len() != 20 {
            return None;
        }
        Some(hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_id_roundtrips_between_external_and_internal() {
        let internal = "0123456789abcdef0123456789abcdef01234567";
        let internal = &internal[..40];
        let id = DiscId::from_internal(internal).unwrap();
        let external = id.external();
        assert_eq!(external.len(), 28);
        let back = DiscId::from_external(&external).unwrap();
        assert_eq!(back.internal(), id.internal());
    }

    #[test]
    fn from_external_rejects_wrong_length() {
        assert!(DiscId::from_external("too-short").is_err());
    }

    #[test]
    fn from_internal_rejects_non_hex() {
        assert!(DiscId::from_internal("not-forty-hex-chars-but-same-length!!!!").is_err());
    }

    fn sample_track() -> Track {
        Track {
            number: 1,
            file_offset: 0,
            file_length: 1000,
            length: 500,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        }
    }

    #[test]
    fn validate_rejects_pregap_offset_past_track_length() {
        let mut t = sample_track();
        t.pregap_offset = 600;
        assert!(t.validate(1000).is_err());
    }

    #[test]
    fn validate_rejects_index_before_pregap_offset() {
        let mut t = sample_track();
        t.pregap_offset = 100;
        t.index = vec![50];
        assert!(t.validate(1000).is_err());
    }

    #[test]
    fn play_order_skips_flagged_tracks() {
        let disc = Disc {
            disc_id: DiscId::from_internal("00000000000000000000000000000000000000aa").unwrap(),
            tracks: vec![
                sample_track(),
                Track {
                    number: 2,
                    skip: true,
                    ..sample_track()
                },
                Track {
                    number: 3,
                    ..sample_track()
                },
            ],
            data_file_name: "data.pcm".to_string(),
            ripped_audio: true,
            ripped_toc: true,
            title: None,
            artist: None,
        };
        assert_eq!(disc.play_order(), vec![0, 2]);
        assert_eq!(disc.no_tracks(), 2);
    }
}
