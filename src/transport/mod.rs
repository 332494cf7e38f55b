//! The playback transport: owns the command API, and drives a source and a
//! sink from two dedicated OS threads connected by a bounded queue.
//!
//! Grounded on the teacher's `PlaybackService` (its own thread plus a
//! command/state split) generalised from one rodio-backed player to the
//! source/sink/context-cancellation contract this crate implements.

pub mod context;
pub mod state;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::disc::DiscId;
use crate::packet::AudioPacket;
use crate::sink::{DrainResult, Sink};
use crate::source::{Source, SourceEvent};

pub use context::ContextClock;
pub use state::{LocalStateBroadcaster, PlayerState, RipState, RipTag, StateBroadcaster, StateTag};

type SharedSource = Arc<Mutex<Box<dyn Source>>>;

enum QueueItem {
    Packet(AudioPacket),
    EndOfStream { context: u64 },
}

struct Inner {
    context: u64,
    source: Option<SharedSource>,
    start_track: u32,
    state: PlayerState,
}

/// The playback transport core: command API plus the two worker threads.
pub struct Transport {
    inner: Arc<Mutex<Inner>>,
    ctx: ContextClock,
    queue_tx: Sender<QueueItem>,
    sink: Arc<Mutex<Box<dyn Sink>>>,
    state_bus: Arc<dyn StateBroadcaster>,
    rip_state: Arc<Mutex<RipState>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    source_thread: Mutex<Option<JoinHandle<()>>>,
    sink_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(sink: Box<dyn Sink>, state_bus: Arc<dyn StateBroadcaster>, queue_capacity: usize) -> Arc<Transport> {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(queue_capacity.max(1));
        let ctx = ContextClock::new();
        let inner = Arc::new(Mutex::new(Inner {
            context: 0,
            source: None,
            start_track: 0,
            state: PlayerState::no_disc(),
        }));
        let sink = Arc::new(Mutex::new(sink));
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let source_thread = {
            let inner = inner.clone();
            let ctx = ctx.clone();
            let tx = queue_tx.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("spindled-source".into())
                .spawn(move || source_thread_loop(inner, ctx, tx, shutdown))
                .expect("spawning the source thread")
        };

        let sink_thread = {
            let inner = inner.clone();
            let ctx = ctx.clone();
            let sink = sink.clone();
            let state_bus = state_bus.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("spindled-sink".into())
                .spawn(move || sink_thread_loop(inner, ctx, queue_rx, sink, state_bus, shutdown))
                .expect("spawning the sink thread")
        };

        Arc::new(Transport {
            inner,
            ctx,
            queue_tx,
            sink,
            state_bus,
            rip_state: Arc::new(Mutex::new(RipState::inactive())),
            shutdown,
            source_thread: Mutex::new(Some(source_thread)),
            sink_thread: Mutex::new(Some(sink_thread)),
        })
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn rip_state(&self) -> RipState {
        self.rip_state.lock().unwrap().clone()
    }

    fn publish(&self, state: &PlayerState) {
        self.state_bus.publish_state(state.clone());
    }

    /// Install a new source, becoming the disruptive command every other
    /// command's table entry refers to as "bump context, stop sink, install
    /// new source, publish WORKING".
    pub fn new_source(&self, mut source: Box<dyn Source>, start_track: u32) {
        let mut inner = self.inner.lock().unwrap();
        let context = self.ctx.bump();
        self.sink.lock().unwrap().stop();
        let initial = source.initial_state(&inner.state);
        inner.context = context;
        inner.start_track = start_track;
        inner.source = Some(Arc::new(Mutex::new(source)));
        inner.state = initial;
        self.publish(&inner.state);
    }

    pub fn eject(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.state == StateTag::NoDisc {
            return;
        }
        inner.context = self.ctx.bump();
        self.sink.lock().unwrap().stop();
        inner.source = None;
        inner.state = PlayerState::no_disc();
        self.publish(&inner.state);
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state.state, StateTag::Stop | StateTag::NoDisc | StateTag::Off) {
            return;
        }
        inner.context = self.ctx.bump();
        self.sink.lock().unwrap().stop();
        if let Some(source) = &inner.source {
            source.lock().unwrap().stopped();
        }
        inner.start_track = 0;
        let mut next_state = inner.state.clone();
        next_state.state = StateTag::Stop;
        inner.state = next_state;
        self.publish(&inner.state);
    }

    /// `play` both starts playback from STOP and resumes from PAUSE,
    /// matching the contract table's two separate rows for the same verb.
    pub fn play(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state.state {
            StateTag::Stop => {
                if inner.source.is_none() {
                    return;
                }
                inner.context = self.ctx.bump();
                let mut next_state = inner.state.clone();
                next_state.state = StateTag::Working;
                inner.state = next_state;
                self.publish(&inner.state);
            }
            StateTag::Pause => {
                self.sink.lock().unwrap().resume();
                let mut next_state = inner.state.clone();
                next_state.state = StateTag::Play;
                inner.state = next_state;
                self.publish(&inner.state);
            }
            _ => {}
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.state != StateTag::Play {
            return;
        }
        let pausable = inner
            .source
            .as_ref()
            .map(|s| s.lock().unwrap().pausable())
            .unwrap_or(false);
        if !pausable {
            return;
        }
        if self.sink.lock().unwrap().pause() {
            let mut next_state = inner.state.clone();
            next_state.state = StateTag::Pause;
            inner.state = next_state;
            self.publish(&inner.state);
        }
    }

    pub fn play_pause(&self) {
        let tag = self.inner.lock().unwrap().state.state;
        match tag {
            StateTag::Play => self.pause(),
            StateTag::Pause => self.play(),
            _ => {}
        }
    }

    pub fn next(&self) {
        self.switch_source(|source, state| source.next_source(state));
    }

    pub fn prev(&self) {
        self.switch_source(|source, state| source.prev_source(state));
    }

    fn switch_source(&self, f: impl FnOnce(&dyn Source, &PlayerState) -> Option<Box<dyn Source>>) {
        let candidate = {
            let inner = self.inner.lock().unwrap();
            if !matches!(inner.state.state, StateTag::Play | StateTag::Pause | StateTag::Stop) {
                return;
            }
            match &inner.source {
                Some(source) => {
                    let guard = source.lock().unwrap();
                    f(&**guard, &inner.state)
                }
                None => return,
            }
        };
        match candidate {
            Some(new_source) => {
                let start_track = new_source.resume_track();
                self.new_source(new_source, start_track);
            }
            None => self.stop(),
        }
    }

    /// Drives the rip-in-progress state. `progress == None` means ripping
    /// has finished (successfully or not); if the player was still in
    /// WORKING waiting on this disc, it falls back to NO_DISC.
    pub fn set_ripping_progress(&self, disc_id: Option<DiscId>, progress: Option<u8>) {
        {
            let mut rip = self.rip_state.lock().unwrap();
            rip.disc_id = disc_id;
            rip.progress = progress;
            rip.state = if progress.is_some() { RipTag::Audio } else { RipTag::Inactive };
            self.state_bus.publish_rip_state(rip.clone());
        }
        if progress.is_none() {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.state == StateTag::Working {
                inner.context = self.ctx.bump();
                inner.source = None;
                inner.state = PlayerState::no_disc();
                self.publish(&inner.state);
            }
        }
    }

    pub fn shutdown(self: &Arc<Self>) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        self.ctx.bump();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
        self.ctx.bump();
        if let Some(handle) = self.source_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.sink_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn source_thread_loop(
    inner: Arc<Mutex<Inner>>,
    ctx: ContextClock,
    queue_tx: Sender<QueueItem>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    loop {
        if shutdown.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let (context, shared_source, start_track) = {
            let guard = inner.lock().unwrap();
            (guard.context, guard.source.clone(), guard.start_track)
        };

        let Some(shared_source) = shared_source else {
            ctx.wait_for_change(context, Duration::from_millis(250));
            continue;
        };

        shared_source.lock().unwrap().start(start_track);

        'stream: loop {
            if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            if !ctx.is_current(context) {
                break 'stream;
            }

            let event = shared_source.lock().unwrap().next_event(&ctx, context);
            match event {
                Ok(SourceEvent::Pending) => {
                    ctx.wait_for_change(context, Duration::from_millis(50));
                }
                Ok(SourceEvent::Packet(packet)) => {
                    if !send_with_context_check(&queue_tx, &ctx, context, QueueItem::Packet(packet)) {
                        break 'stream;
                    }
                }
                Ok(SourceEvent::EndOfStream) => {
                    let _ = queue_tx.send(QueueItem::EndOfStream { context });
                    break 'stream;
                }
                Err(err) => {
                    tracing::error!(%err, "source error, ending stream");
                    let _ = queue_tx.send(QueueItem::EndOfStream { context });
                    break 'stream;
                }
            }
        }

        ctx.wait_for_change(context, Duration::from_millis(250));
    }
}

/// Push `item` onto the queue, retrying a full channel in short bursts so a
/// blocked send can still notice a context change (and abandon a now-stale
/// packet) instead of hanging until the sink-thread drains space.
fn send_with_context_check(tx: &Sender<QueueItem>, ctx: &ContextClock, context: u64, mut item: QueueItem) -> bool {
    loop {
        match tx.send_timeout(item, Duration::from_millis(100)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                item = back;
                if !ctx.is_current(context) {
                    return false;
                }
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn sink_thread_loop(
    inner: Arc<Mutex<Inner>>,
    ctx: ContextClock,
    queue_rx: Receiver<QueueItem>,
    sink: Arc<Mutex<Box<dyn Sink>>>,
    state_bus: Arc<dyn StateBroadcaster>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    #[derive(PartialEq)]
    enum Phase {
        Idle,
        Adding,
        Draining,
    }
    let mut phase = Phase::Idle;
    let mut active_context: Option<u64> = None;

    // (context, track, index, position_seconds) of the last state actually
    // published, so repeated packets within the same whole second don't
    // each trigger a broadcast.
    let last_published: std::cell::Cell<Option<(u64, u32, u32, i64)>> = std::cell::Cell::new(None);

    let publish_progress = |packet: &AudioPacket| {
        let mut guard = inner.lock().unwrap();
        if guard.context != packet.context || !matches!(guard.state.state, StateTag::Working | StateTag::Play) {
            return;
        }
        let info = packet.info();
        let position_seconds = info.position_seconds();
        let key = (packet.context, info.track, info.index, position_seconds);
        if last_published.get() == Some(key) {
            return;
        }
        last_published.set(Some(key));
        guard.state.state = StateTag::Play;
        guard.state.track = info.track;
        guard.state.no_tracks = info.no_tracks;
        guard.state.index = info.index;
        guard.state.position_seconds = position_seconds;
        state_bus.publish_state(guard.state.clone());
    };

    let publish_stop = |context: u64| {
        let mut guard = inner.lock().unwrap();
        if guard.context != context {
            return;
        }
        let mut next = guard.state.clone();
        next.state = StateTag::Stop;
        guard.state = next;
        state_bus.publish_state(guard.state.clone());
    };

    loop {
        if shutdown.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        match phase {
            Phase::Idle => {
                let item = match queue_rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(item) => item,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                };
                match item {
                    QueueItem::EndOfStream { context } => {
                        if ctx.is_current(context) {
                            publish_stop(context);
                        }
                    }
                    QueueItem::Packet(packet) => {
                        if !ctx.is_current(packet.context) {
                            continue;
                        }
                        active_context = Some(packet.context);
                        if let Err(err) = sink.lock().unwrap().start(packet.format) {
                            tracing::error!(%err, "sink failed to start");
                        }
                        phase = Phase::Adding;
                        feed_packet(&sink, &ctx, &packet, &publish_progress);
                    }
                }
            }
            Phase::Adding => match queue_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(QueueItem::Packet(packet)) => {
                    if !ctx.is_current(packet.context) {
                        continue;
                    }
                    feed_packet(&sink, &ctx, &packet, &publish_progress);
                }
                Ok(QueueItem::EndOfStream { context }) => {
                    if ctx.is_current(context) {
                        active_context = Some(context);
                        phase = Phase::Draining;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            },
            Phase::Draining => {
                let result = sink.lock().unwrap().drain();
                match result {
                    Ok(DrainResult::Playing(_)) => {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    Ok(DrainResult::Done) => {
                        if let Some(context) = active_context.take() {
                            if ctx.is_current(context) {
                                publish_stop(context);
                            }
                        }
                        phase = Phase::Idle;
                    }
                    Err(err) => {
                        tracing::error!(%err, "drain error");
                        phase = Phase::Idle;
                    }
                }
            }
        }
    }
}

fn feed_packet(
    sink: &Arc<Mutex<Box<dyn Sink>>>,
    ctx: &ContextClock,
    packet: &AudioPacket,
    publish_progress: &impl Fn(&AudioPacket),
) {
    let total = packet.data_len();
    let mut offset = 0usize;
    while offset < total {
        if !ctx.is_current(packet.context) {
            return;
        }
        let result = sink.lock().unwrap().add_packet(packet, offset);
        match result {
            Ok(r) => {
                offset += r.bytes_consumed;
                if r.playing.is_some() {
                    publish_progress(packet);
                }
                if r.bytes_consumed == 0 {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            Err(err) => {
                tracing::error!(%err, "add_packet failed, dropping remainder of packet");
                return;
            }
        }
    }
    if total == 0 {
        publish_progress(packet);
    }
}
