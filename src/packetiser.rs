//! Turns a disc's track layout into a lazy sequence of packet descriptors.
//!
//! The packetiser never touches a data file: it only computes packet
//! boundaries and flags. A [`crate::source::Source`] is responsible for
//! filling in `data` (or deciding a packet is silence) before handing a
//! packet on to the sink.

use std::sync::Arc;

use crate::disc::Disc;
use crate::packet::{AudioFormat, AudioPacket, PacketFlags};

#[derive(Debug, Clone, Copy)]
pub struct PacketiserConfig {
    /// Target packet rate; actual packet length is rounded to whole frames.
    pub packets_per_second: u32,
}

impl Default for PacketiserConfig {
    fn default() -> Self {
        PacketiserConfig {
            packets_per_second: 5,
        }
    }
}

/// Lazily emits [`AudioPacket`] descriptors for one disc, starting at a given
/// play-order position.
///
/// The first track the iterator reaches starts at its own `pregap_offset`
/// (its pregap is not replayed, matching how disc selection normally jumps
/// straight to index 1). Every track reached afterwards by natural
/// advancement starts at `0`, replaying its pregap as part of continuous
/// playback.
pub struct Packetiser {
    disc: Arc<Disc>,
    format: AudioFormat,
    frame_size: u64,
    play_order: Vec<usize>,
    play_order_pos: usize,
    abs_pos: u64,
    at_track_start: bool,
    done: bool,
}

impl Packetiser {
    /// `start_track` is a 0-based index into the disc's play order (i.e.
    /// among non-skipped tracks), not a raw `Track::number`.
    pub fn new(disc: Arc<Disc>, start_track: u32, format: AudioFormat, config: PacketiserConfig) -> Self {
        let play_order = disc.play_order();
        let frame_size = (format.rate / config.packets_per_second.max(1)).max(1) as u64;
        let play_order_pos = (start_track as usize).min(play_order.len());
        let done = play_order_pos >= play_order.len();
        let abs_pos = if done {
            0
        } else {
            disc.tracks[play_order[play_order_pos]].pregap_offset
        };
        Packetiser {
            disc,
            format,
            frame_size,
            play_order,
            play_order_pos,
            abs_pos,
            at_track_start: true,
            done,
        }
    }

    fn current_track_index(&self) -> Option<usize> {
        self.play_order.get(self.play_order_pos).copied()
    }

    fn index_for(&self, track_idx: usize, abs_pos: u64) -> u32 {
        let track = &self.disc.tracks[track_idx];
        if abs_pos < track.pregap_offset {
            return 0;
        }
        let mut count = 1u32;
        count += track
            .index
            .iter()
            .filter(|&&idx| idx <= abs_pos)
            .count() as u32;
        count
    }

    fn file_pos_for(&self, track_idx: usize, abs_pos: u64) -> Option<u64> {
        let track = &self.disc.tracks[track_idx];
        if abs_pos < track.pregap_silence {
            None
        } else {
            Some(track.file_offset + (abs_pos - track.pregap_silence))
        }
    }

    /// Smallest boundary strictly greater than `abs_pos` at which a packet
    /// must end: the pregap-silence/pregap-offset/index seams, or the end of
    /// the track.
    fn next_boundary(&self, track_idx: usize, abs_pos: u64) -> u64 {
        let track = &self.disc.tracks[track_idx];
        let mut boundary = track.length;
        let mut consider = |b: u64| {
            if b > abs_pos && b < boundary {
                boundary = b;
            }
        };
        consider(track.pregap_silence);
        consider(track.pregap_offset);
        for &idx in &track.index {
            consider(idx);
        }
        boundary
    }
}

impl Iterator for Packetiser {
    type Item = AudioPacket;

    fn next(&mut self) -> Option<AudioPacket> {
        loop {
            if self.done {
                return None;
            }
            let track_idx = self.current_track_index()?;
            let track = &self.disc.tracks[track_idx];

            if self.abs_pos >= track.length {
                // Track exhausted; move on to the next play-order entry.
                self.play_order_pos += 1;
                self.abs_pos = 0;
                self.at_track_start = true;
                if self.play_order_pos >= self.play_order.len() {
                    self.done = true;
                    return None;
                }
                continue;
            }

            let boundary = self.next_boundary(track_idx, self.abs_pos);
            let length = self.frame_size.min(boundary - self.abs_pos).max(1);
            let index = self.index_for(track_idx, self.abs_pos);
            let file_pos = self.file_pos_for(track_idx, self.abs_pos);

            let next_abs = self.abs_pos + length;
            let mut flags = PacketFlags::NONE;
            if next_abs >= track.length && track.pause_after && self.play_order_pos + 1 < self.play_order.len() {
                flags.insert(PacketFlags::PAUSE_AFTER);
            }

            let rel_pos = self.abs_pos as i64 - track.pregap_offset as i64;
            let packet = AudioPacket {
                disc_id: self.disc.disc_id.clone(),
                track: track.number,
                track_number_in_play_order: self.play_order_pos as u32,
                no_tracks: self.play_order.len() as u32,
                index,
                abs_pos: self.abs_pos,
                rel_pos,
                length: length as u32,
                file_pos,
                flags,
                data: None,
                format: self.format,
                context: 0,
            };

            self.abs_pos = next_abs;
            self.at_track_start = false;
            return Some(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{DiscId, Track};

    fn disc_with_one_track(length: u64, pregap_offset: u64, pregap_silence: u64, index: Vec<u64>) -> Arc<Disc> {
        Arc::new(Disc {
            disc_id: DiscId::from_internal("0000000000000000000000000000000000000001").unwrap(),
            tracks: vec![Track {
                number: 1,
                file_offset: 0,
                file_length: length - pregap_silence,
                length,
                pregap_offset,
                pregap_silence,
                index,
                pause_after: false,
                skip: false,
            }],
            data_file_name: "data.pcm".into(),
            ripped_audio: true,
            ripped_toc: true,
            title: None,
            artist: None,
        })
    }

    fn cfg() -> PacketiserConfig {
        PacketiserConfig {
            packets_per_second: 2,
        }
    }

    #[test]
    fn first_track_skips_its_own_pregap() {
        let disc = disc_with_one_track(1000, 100, 0, vec![]);
        let mut p = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg());
        let first = p.next().unwrap();
        assert_eq!(first.abs_pos, 100);
        assert_eq!(first.rel_pos, 0);
    }

    #[test]
    fn packet_never_straddles_pregap_silence_boundary() {
        let disc = disc_with_one_track(1000, 200, 150, vec![]);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        for p in &packets {
            let end = p.abs_pos + p.length as u64;
            assert!(!(p.abs_pos < 150 && end > 150), "packet straddled silence boundary: {:?}", p.abs_pos);
        }
    }

    #[test]
    fn packet_never_straddles_index_point() {
        let disc = disc_with_one_track(1000, 0, 0, vec![400]);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        for p in &packets {
            let end = p.abs_pos + p.length as u64;
            assert!(!(p.abs_pos < 400 && end > 400));
        }
    }

    #[test]
    fn index_is_zero_before_pregap_offset_else_counts_seams() {
        let disc = disc_with_one_track(1000, 200, 0, vec![400, 600]);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        for p in &packets {
            if p.abs_pos < 200 {
                assert_eq!(p.index, 0);
            } else if p.abs_pos < 400 {
                assert_eq!(p.index, 1);
            } else if p.abs_pos < 600 {
                assert_eq!(p.index, 2);
            } else {
                assert_eq!(p.index, 3);
            }
        }
    }

    #[test]
    fn file_pos_is_none_within_silence_and_present_after() {
        let disc = disc_with_one_track(1000, 200, 150, vec![]);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        for p in &packets {
            if p.abs_pos < 150 {
                assert!(p.file_pos.is_none());
            } else {
                assert_eq!(p.file_pos, Some(p.abs_pos - 150));
            }
        }
    }

    #[test]
    fn subsequent_tracks_include_their_pregap() {
        let mut disc = (*disc_with_one_track(500, 50, 0, vec![])).clone();
        disc.tracks.push(Track {
            number: 2,
            file_offset: 500,
            file_length: 300,
            length: 300,
            pregap_offset: 30,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        });
        let disc = Arc::new(disc);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        let first_of_track_two = packets
            .iter()
            .find(|p| p.track_number_in_play_order == 1)
            .unwrap();
        assert_eq!(first_of_track_two.abs_pos, 0);
    }

    #[test]
    fn pause_after_flag_set_only_on_last_packet_before_next_track() {
        let mut disc = (*disc_with_one_track(500, 0, 0, vec![])).clone();
        disc.tracks[0].pause_after = true;
        disc.tracks.push(Track {
            number: 2,
            file_offset: 500,
            file_length: 300,
            length: 300,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        });
        let disc = Arc::new(disc);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        let last_of_track_one = packets
            .iter()
            .filter(|p| p.track_number_in_play_order == 0)
            .last()
            .unwrap();
        assert!(last_of_track_one.flags.contains(PacketFlags::PAUSE_AFTER));
        assert!(packets
            .iter()
            .filter(|p| p.track_number_in_play_order == 0)
            .rev()
            .skip(1)
            .all(|p| !p.flags.contains(PacketFlags::PAUSE_AFTER)));
    }

    #[test]
    fn skipped_tracks_are_absent_from_play_order() {
        let mut disc = (*disc_with_one_track(500, 0, 0, vec![])).clone();
        disc.tracks.push(Track {
            number: 2,
            file_offset: 500,
            file_length: 300,
            length: 300,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: true,
        });
        disc.tracks.push(Track {
            number: 3,
            file_offset: 800,
            file_length: 300,
            length: 300,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        });
        let disc = Arc::new(disc);
        let packets: Vec<_> = Packetiser::new(disc, 0, AudioFormat::CDDA, cfg()).collect();
        assert!(packets.iter().all(|p| p.track != 2));
        assert_eq!(
            packets
                .iter()
                .map(|p| p.track_number_in_play_order)
                .max()
                .unwrap(),
            1
        );
    }
}
