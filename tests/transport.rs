//! End-to-end tests driving the real `Transport` and `DiscSource` against
//! small synthetic discs, with an in-memory `Sink` standing in for a real
//! audio device, covering the scenarios the spec calls out by name.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spindled::disc::{Disc, DiscId, Track};
use spindled::packet::{AudioFormat, AudioPacket, PacketInfo};
use spindled::packetiser::PacketiserConfig;
use spindled::sink::{AddPacketResult, DrainResult, Sink, SinkError};
use spindled::source::disc::DiscSource;
use spindled::transport::{LocalStateBroadcaster, StateTag, Transport};

const FORMAT: AudioFormat = AudioFormat::CDDA;

/// A `Sink` that just counts bytes in and reports the packet it was handed
/// as immediately "playing", with no real device underneath. Lets these
/// tests run without any audio hardware.
#[derive(Default)]
struct FakeSink {
    received_bytes: Arc<AtomicUsize>,
    last_info: Arc<Mutex<Option<PacketInfo>>>,
}

impl FakeSink {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Option<PacketInfo>>>) {
        let received_bytes = Arc::new(AtomicUsize::new(0));
        let last_info = Arc::new(Mutex::new(None));
        (
            FakeSink {
                received_bytes: received_bytes.clone(),
                last_info: last_info.clone(),
            },
            received_bytes,
            last_info,
        )
    }
}

impl Sink for FakeSink {
    fn start(&mut self, _format: AudioFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn add_packet(&mut self, packet: &AudioPacket, offset: usize) -> Result<AddPacketResult, SinkError> {
        let remaining = packet.data_len() - offset;
        self.received_bytes.fetch_add(remaining, Ordering::Release);
        *self.last_info.lock().unwrap() = Some(packet.info());
        Ok(AddPacketResult {
            bytes_consumed: remaining,
            playing: Some(packet.info()),
        })
    }

    fn pause(&mut self) -> bool {
        true
    }

    fn resume(&mut self) {}

    fn stop(&mut self) {}

    fn drain(&mut self) -> Result<DrainResult, SinkError> {
        Ok(DrainResult::Done)
    }
}

struct FixtureLibrary {
    disc: Disc,
    data_path: std::path::PathBuf,
}

impl spindled::library::Library for FixtureLibrary {
    fn lookup(&self, _disc_id: &DiscId) -> Result<Disc, spindled::library::LibraryError> {
        Ok(self.disc.clone())
    }

    fn data_file_path(&self, _disc: &Disc) -> Result<std::path::PathBuf, spindled::library::LibraryError> {
        Ok(self.data_path.clone())
    }
}

fn single_track_disc(frames: u64) -> (Disc, tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("data.pcm");
    let bytes_per_frame = FORMAT.bytes_per_frame() as u64;
    let mut file = std::fs::File::create(&data_path).unwrap();
    file.write_all(&vec![0u8; (frames * bytes_per_frame) as usize]).unwrap();

    let disc = Disc {
        disc_id: DiscId::from_internal("0000000000000000000000000000000000000001").unwrap(),
        tracks: vec![Track {
            number: 1,
            file_offset: 0,
            file_length: frames * bytes_per_frame,
            length: frames,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        }],
        data_file_name: "data.pcm".to_string(),
        ripped_audio: true,
        ripped_toc: true,
        title: None,
        artist: None,
    };
    (disc, dir, data_path)
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// S1 — a short single-track disc plays to completion and the transport
/// settles on STOP once the source runs out of packets.
#[test]
fn plays_a_short_track_then_stops() {
    let (disc, _dir, data_path) = single_track_disc(3 * 8820); // 3 packets at 5 pkt/s
    let disc = Arc::new(disc);
    let library: Arc<dyn spindled::library::Library> = Arc::new(FixtureLibrary {
        disc: (*disc).clone(),
        data_path,
    });

    let (sink, received_bytes, _last_info) = FakeSink::new();
    let state_bus = Arc::new(LocalStateBroadcaster::new());
    let transport = Transport::new(Box::new(sink), state_bus.clone(), 16);

    let source = DiscSource::new(
        disc.clone(),
        library,
        FORMAT,
        PacketiserConfig { packets_per_second: 5 },
        None,
    );
    transport.new_source(Box::new(source), 0);

    assert!(wait_until(
        || transport.state().state == StateTag::Stop,
        Duration::from_secs(5)
    ));

    let expected_bytes = 3 * 8820 * FORMAT.bytes_per_frame();
    assert_eq!(received_bytes.load(Ordering::Acquire), expected_bytes);
}

/// S5 — the transport stays responsive to `eject` while a `DiscSource` is
/// retrying a still-ripping file that hasn't appeared on disk yet.
#[test]
fn eject_is_responsive_during_a_rip_race() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("data.pcm"); // deliberately never created

    let disc = Disc {
        disc_id: DiscId::from_internal("0000000000000000000000000000000000000002").unwrap(),
        tracks: vec![Track {
            number: 1,
            file_offset: 0,
            file_length: 8820 * FORMAT.bytes_per_frame() as u64,
            length: 8820,
            pregap_offset: 0,
            pregap_silence: 0,
            index: vec![],
            pause_after: false,
            skip: false,
        }],
        data_file_name: "data.pcm".to_string(),
        ripped_audio: false,
        ripped_toc: true,
        title: None,
        artist: None,
    };
    let disc = Arc::new(disc);
    let library: Arc<dyn spindled::library::Library> = Arc::new(FixtureLibrary {
        disc: (*disc).clone(),
        data_path,
    });

    let (sink, _received_bytes, _last_info) = FakeSink::new();
    let state_bus = Arc::new(LocalStateBroadcaster::new());
    let transport = Transport::new(Box::new(sink), state_bus, 16);

    let is_ripping = Arc::new(AtomicBool::new(true));
    let source = DiscSource::new(
        disc,
        library,
        FORMAT,
        PacketiserConfig { packets_per_second: 5 },
        Some(is_ripping),
    );
    transport.new_source(Box::new(source), 0);

    // Give the source-thread a couple of retry iterations against the
    // missing file before asking it to eject.
    std::thread::sleep(Duration::from_millis(150));
    let issued_at = Instant::now();
    transport.eject();

    assert!(wait_until(
        || transport.state().state == StateTag::NoDisc,
        Duration::from_millis(1500)
    ));
    assert!(issued_at.elapsed() < Duration::from_millis(1500));
}

/// S4 — a non-pausable source (radio) ignores `pause` entirely; state stays
/// at whatever it was, and the sink's `pause` is never even reached.
#[test]
fn pause_is_ignored_for_an_unpausable_source() {
    struct NeverPausableSource;

    impl spindled::source::Source for NeverPausableSource {
        fn initial_state(&self, _previous: &spindled::PlayerState) -> spindled::PlayerState {
            let mut s = spindled::PlayerState::no_disc();
            s.state = StateTag::Play;
            s
        }
        fn pausable(&self) -> bool {
            false
        }
        fn stopped(&mut self) {}
        fn next_source(&self, _state: &spindled::PlayerState) -> Option<Box<dyn spindled::source::Source>> {
            None
        }
        fn prev_source(&self, _state: &spindled::PlayerState) -> Option<Box<dyn spindled::source::Source>> {
            None
        }
        fn start(&mut self, _start_track: u32) {}
        fn next_event(
            &mut self,
            ctx: &spindled::transport::ContextClock,
            context: u64,
        ) -> Result<spindled::source::SourceEvent, spindled::source::SourceError> {
            ctx.wait_for_change(context, Duration::from_millis(20));
            Ok(spindled::source::SourceEvent::Pending)
        }
    }

    let (sink, _bytes, _last_info) = FakeSink::new();
    let state_bus = Arc::new(LocalStateBroadcaster::new());
    let transport = Transport::new(Box::new(sink), state_bus, 16);

    transport.new_source(Box::new(NeverPausableSource), 0);
    assert_eq!(transport.state().state, StateTag::Play);

    transport.pause();
    std::thread::sleep(Duration::from_millis(50));
    assert_ne!(transport.state().state, StateTag::Pause);
}
