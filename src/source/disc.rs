//! Plays PCM packets out of a ripped disc's data file.
//!
//! Grounded on the original player's `PCMDiscSource`: a file is opened
//! lazily (retrying while a rip is still in progress, since the file may not
//! exist yet), and a short read is retried with a one-second backoff rather
//! than treated as an error, for the same reason.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::disc::Disc;
use crate::library::Library;
use crate::packet::AudioFormat;
use crate::packetiser::{Packetiser, PacketiserConfig};
use crate::transport::context::ContextClock;
use crate::transport::state::{PlayerState, StateTag};

use super::{Source, SourceError, SourceEvent};

const RIP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A second `prev` within this window of a first jumps back an extra track;
/// otherwise `prev` just restarts the current one. Matches how most CD
/// transports treat a "previous track" button.
const PREV_DOUBLE_TAP_WINDOW: Duration = Duration::from_secs(2);

pub struct DiscSource {
    disc: Arc<Disc>,
    library: Arc<dyn Library>,
    format: AudioFormat,
    config: PacketiserConfig,
    is_ripping: Option<Arc<AtomicBool>>,
    file: Option<File>,
    packetiser: Option<Packetiser>,
    /// Track to resume at on a later `play` from STOP; reset to 0 by
    /// `stopped()`, advanced past a `PAUSE_AFTER` packet's track.
    remembered_track: u32,
    /// When the last `prev_source` call restarted (rather than skipped
    /// back past) the current track, so a quick second press skips back
    /// an extra track instead of restarting again.
    last_prev_restart: Mutex<Option<Instant>>,
}

impl DiscSource {
    pub fn new(
        disc: Arc<Disc>,
        library: Arc<dyn Library>,
        format: AudioFormat,
        config: PacketiserConfig,
        is_ripping: Option<Arc<AtomicBool>>,
    ) -> Self {
        DiscSource {
            disc,
            library,
            format,
            config,
            is_ripping,
            file: None,
            packetiser: None,
            remembered_track: 0,
            last_prev_restart: Mutex::new(None),
        }
    }

    /// Call once the concurrent rip for this disc (if any) has finished, so
    /// retries stop waiting on it.
    pub fn rip_finished(&self) {
        if let Some(flag) = &self.is_ripping {
            flag.store(false, Ordering::Release);
        }
    }

    fn ripping(&self) -> bool {
        self.is_ripping
            .as_ref()
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn open_file(&mut self, ctx: &ContextClock, context: u64) -> Result<(), SourceError> {
        let path = self
            .library
            .data_file_path(&self.disc)
            .map_err(|e| SourceError::Open {
                path: self.disc.data_file_name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
            })?;
        loop {
            match File::open(&path) {
                Ok(f) => {
                    self.file = Some(f);
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.ripping() => {
                    ctx.wait_for_change(context, RIP_RETRY_DELAY);
                    if !ctx.is_current(context) {
                        return Err(SourceError::Open {
                            path: path.display().to_string(),
                            source: e,
                        });
                    }
                }
                Err(e) => {
                    return Err(SourceError::Open {
                        path: path.display().to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Read `length` bytes at byte offset `file_pos`, retrying with backoff
    /// while a rip is in progress, per the original source's short-read
    /// handling.
    fn read_data(&mut self, file_pos: u64, length: usize, ctx: &ContextClock, context: u64) -> Result<Bytes, SourceError> {
        let path = self.disc.data_file_name.clone();
        let file = self.file.as_mut().expect("file opened before reads begin");
        let mut buf = vec![0u8; length];
        let mut filled = 0usize;

        file.seek(SeekFrom::Start(file_pos))
            .map_err(|source| SourceError::Read { path: path.clone(), source })?;
        filled += file
            .read(&mut buf[filled..])
            .map_err(|source| SourceError::Read { path: path.clone(), source })?;

        while filled < length && self.ripping() {
            ctx.wait_for_change(context, RIP_RETRY_DELAY);
            if !ctx.is_current(context) {
                break;
            }
            file.seek(SeekFrom::Start(file_pos + filled as u64))
                .map_err(|source| SourceError::Read { path: path.clone(), source })?;
            let n = file
                .read(&mut buf[filled..])
                .map_err(|source| SourceError::Read { path: path.clone(), source })?;
            if n == 0 && !self.ripping() {
                break;
            }
            filled += n;
        }

        if filled < length {
            return Err(SourceError::UnexpectedEof {
                path,
                remaining: length - filled,
            });
        }
        Ok(Bytes::from(buf))
    }
}

impl Source for DiscSource {
    fn initial_state(&self, _previous: &PlayerState) -> PlayerState {
        PlayerState {
            state: StateTag::Working,
            disc_id: Some(self.disc.disc_id.clone()),
            source_disc_id: Some(self.disc.disc_id.clone()),
            stream_name: None,
            track: 0,
            no_tracks: self.disc.no_tracks(),
            index: 0,
            position_seconds: 0,
            length_seconds: 0,
            error: None,
        }
    }

    fn pausable(&self) -> bool {
        true
    }

    fn stopped(&mut self) {
        self.remembered_track = 0;
        self.file = None;
        self.packetiser = None;
    }

    fn next_source(&self, state: &PlayerState) -> Option<Box<dyn Source>> {
        let play_order_len = self.disc.play_order().len() as u32;
        if play_order_len == 0 {
            return None;
        }

        // From STOP there's no current track to advance past; `next` starts
        // the disc over from its first track.
        let next_play_order = if state.state == StateTag::Stop {
            0
        } else {
            state_track_to_play_order(self.disc.as_ref(), state.track)? + 1
        };
        if next_play_order >= play_order_len {
            return None;
        }
        let mut src = self.sibling();
        src.remembered_track = next_play_order;
        Some(Box::new(src))
    }

    fn prev_source(&self, state: &PlayerState) -> Option<Box<dyn Source>> {
        let play_order_len = self.disc.play_order().len() as u32;
        if play_order_len == 0 {
            return None;
        }

        // From STOP there's no current track to restart or skip back from;
        // `prev` starts the disc at its last track.
        if state.state == StateTag::Stop {
            let mut src = self.sibling();
            src.remembered_track = play_order_len - 1;
            return Some(Box::new(src));
        }

        let current_play_order = state_track_to_play_order(self.disc.as_ref(), state.track)?;

        let was_recent_restart = self
            .last_prev_restart
            .lock()
            .unwrap()
            .map(|t| t.elapsed() < PREV_DOUBLE_TAP_WINDOW)
            .unwrap_or(false);
        let restart_current = state.position_seconds > 0 && !was_recent_restart;

        let target_play_order = if restart_current {
            current_play_order
        } else if current_play_order == 0 {
            return None;
        } else {
            current_play_order - 1
        };

        let mut src = self.sibling();
        src.remembered_track = target_play_order;
        // Carry the restart timestamp forward onto the replacement source,
        // since `prev_source` always returns a brand new instance and the
        // double-tap window needs to survive across that swap.
        *src.last_prev_restart.lock().unwrap() = if restart_current { Some(Instant::now()) } else { None };
        Some(Box::new(src))
    }

    /// A fresh `DiscSource` over the same disc/library/format/config, the
    /// common starting point `next_source`/`prev_source` build their
    /// replacement from.
    fn sibling(&self) -> DiscSource {
        DiscSource::new(
            self.disc.clone(),
            self.library.clone(),
            self.format,
            self.config,
            self.is_ripping.clone(),
        )
    }

    fn resume_track(&self) -> u32 {
        self.remembered_track
    }

    fn start(&mut self, start_track: u32) {
        self.remembered_track = start_track;
        self.file = None;
        self.packetiser = Some(Packetiser::new(
            self.disc.clone(),
            start_track,
            self.format,
            self.config,
        ));
    }

    fn next_event(&mut self, ctx: &ContextClock, context: u64) -> Result<SourceEvent, SourceError> {
        if self.file.is_none() {
            self.open_file(ctx, context)?;
            if !ctx.is_current(context) {
                return Ok(SourceEvent::Pending);
            }
        }

        let Some(packetiser) = self.packetiser.as_mut() else {
            return Ok(SourceEvent::EndOfStream);
        };

        let Some(mut packet) = packetiser.next() else {
            return Ok(SourceEvent::EndOfStream);
        };

        let data = match packet.file_pos {
            Some(file_pos) => {
                let length_bytes = packet.length as usize * self.format.bytes_per_frame();
                let byte_pos = file_pos * self.format.bytes_per_frame() as u64;
                self.read_data(byte_pos, length_bytes, ctx, context)?
            }
            None => {
                let length_bytes = packet.length as usize * self.format.bytes_per_frame();
                Bytes::from(vec![0u8; length_bytes])
            }
        };
        packet.data = Some(data);

        if packet.flags.contains(crate::packet::PacketFlags::PAUSE_AFTER) {
            self.remembered_track = packet.track_number_in_play_order + 1;
        }

        Ok(SourceEvent::Packet(packet))
    }
}

fn state_track_to_play_order(disc: &Disc, track_number: u32) -> Option<u32> {
    disc.play_order()
        .iter()
        .position(|&idx| disc.tracks[idx].number == track_number)
        .map(|p| p as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Library, LibraryError};
    use std::path::PathBuf;

    struct EmptyLibrary;
    impl Library for EmptyLibrary {
        fn lookup(&self, disc_id: &crate::disc::DiscId) -> Result<Disc, LibraryError> {
            Err(LibraryError::NotFound(disc_id.clone()))
        }
        fn data_file_path(&self, _disc: &Disc) -> Result<PathBuf, LibraryError> {
            Ok(PathBuf::from("unused"))
        }
    }

    fn two_track_disc() -> Arc<Disc> {
        let track = |number: u32| crate::disc::Track {
            number,
            file_offset: 0,
            file_length: 1000,
            length: 500,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        };
        Arc::new(Disc {
            disc_id: crate::disc::DiscId::from_internal("0000000000000000000000000000000000000003").unwrap(),
            tracks: vec![track(1), track(2)],
            data_file_name: "data.pcm".to_string(),
            ripped_audio: true,
            ripped_toc: true,
            title: None,
            artist: None,
        })
    }

    fn source_at_track(disc: &Arc<Disc>) -> DiscSource {
        DiscSource::new(
            disc.clone(),
            Arc::new(EmptyLibrary),
            AudioFormat::CDDA,
            PacketiserConfig::default(),
            None,
        )
    }

    fn state_for_track(track: u32, position_seconds: i64) -> PlayerState {
        let mut state = PlayerState::no_disc();
        state.track = track;
        state.position_seconds = position_seconds;
        state
    }

    /// First `prev` partway through track 2 restarts track 2 rather than
    /// skipping back to track 1.
    #[test]
    fn prev_restarts_current_track_when_partway_through() {
        let disc = two_track_disc();
        let source = source_at_track(&disc);
        let state = state_for_track(2, 10);

        let next = source.prev_source(&state).expect("track 1 is available to fall back to");
        assert_eq!(next.resume_track(), 1); // play-order index of track 2
    }

    /// A second `prev` within the double-tap window skips back an extra
    /// track instead of restarting the current one again.
    #[test]
    fn second_prev_within_window_skips_back_an_extra_track() {
        let disc = two_track_disc();
        let source = source_at_track(&disc);
        let state = state_for_track(2, 10);

        let restarted = source.prev_source(&state).unwrap();
        // Simulate the restarted source itself being the one asked for
        // `prev` again, a few hundred ms later, still within the window.
        let still_mid_track = state_for_track(2, 1);
        let skipped_back = restarted.prev_source(&still_mid_track).expect("track 1 exists");
        assert_eq!(skipped_back.resume_track(), 0); // play-order index of track 1
    }

    /// `prev` at the very start of the first track has nothing to fall back
    /// to.
    #[test]
    fn prev_at_start_of_first_track_returns_none() {
        let disc = two_track_disc();
        let source = source_at_track(&disc);
        let state = state_for_track(1, 0);
        assert!(source.prev_source(&state).is_none());
    }

    fn stopped_state() -> PlayerState {
        let mut state = PlayerState::no_disc();
        state.state = StateTag::Stop;
        state
    }

    /// `next` from STOP starts the disc over at its first track, regardless
    /// of whatever track was last playing.
    #[test]
    fn next_from_stop_starts_at_first_track() {
        let disc = two_track_disc();
        let source = source_at_track(&disc);
        let next = source.next_source(&stopped_state()).expect("disc has tracks");
        assert_eq!(next.resume_track(), 0);
    }

    /// `prev` from STOP jumps to the disc's last track.
    #[test]
    fn prev_from_stop_starts_at_last_track() {
        let disc = two_track_disc();
        let source = source_at_track(&disc);
        let prev = source.prev_source(&stopped_state()).expect("disc has tracks");
        assert_eq!(prev.resume_track(), 1);
    }
}
