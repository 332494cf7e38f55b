//! cpal-backed PCM output.
//!
//! Grounded on the teacher's raw `cpal` device handling
//! (`playback/cpal_output.rs`): pick a supported config, open a callback
//! stream, push samples in from the calling thread. Unlike a blocking ALSA
//! write loop, cpal's callback pulls samples on its own thread, so this sink
//! stages incoming bytes into period-sized chunks and hands each finished
//! period to a lock-free ring buffer the callback drains from; that's the
//! closest equivalent to ALSA's period-quantised `snd_pcm_writei` available
//! on top of cpal's pull model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::packet::{AudioFormat, AudioPacket, PacketInfo};

use super::{AddPacketResult, DrainResult, Sink, SinkError};

const REOPEN_BACKOFF: Duration = Duration::from_secs(3);
const PERIOD_FRAMES: usize = 1024;
/// Ring buffer capacity in frames; a few periods deep so the callback has
/// headroom before it runs dry.
const RING_FRAMES: usize = PERIOD_FRAMES * 8;

pub struct PcmSink {
    device_name: Option<String>,
    format: Option<AudioFormat>,
    stream: Option<cpal::Stream>,
    producer: Option<ringbuf::HeapProd<i16>>,
    paused: Arc<AtomicBool>,
    /// Interleaved samples accumulated from `add_packet` calls until a full
    /// period is ready to push into the ring buffer.
    pending: Vec<i16>,
    last_open_attempt: Option<Instant>,
    last_playing: Arc<Mutex<Option<PacketInfo>>>,
}

impl PcmSink {
    pub fn new(device_name: Option<String>) -> Self {
        PcmSink {
            device_name,
            format: None,
            stream: None,
            producer: None,
            paused: Arc::new(AtomicBool::new(false)),
            pending: Vec::new(),
            last_open_attempt: None,
            last_playing: Arc::new(Mutex::new(None)),
        }
    }

    fn pick_device(&self) -> Result<cpal::Device, SinkError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| SinkError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or(SinkError::NoDevice),
            None => host.default_output_device().ok_or(SinkError::NoDevice),
        }
    }

    fn open_device(&mut self, format: AudioFormat) -> Result<(), SinkError> {
        let device = self.pick_device()?;
        let wanted = cpal::SupportedStreamConfig::new(
            format.channels,
            cpal::SampleRate(format.rate),
            cpal::SupportedBufferSize::Range {
                min: PERIOD_FRAMES as u32,
                max: RING_FRAMES as u32,
            },
            cpal::SampleFormat::I16,
        );

        let supports = device
            .supported_output_configs()
            .map_err(|e| SinkError::Device(e.to_string()))?
            .any(|c| {
                c.channels() == format.channels
                    && c.sample_format() == cpal::SampleFormat::I16
                    && c.min_sample_rate().0 <= format.rate
                    && c.max_sample_rate().0 >= format.rate
            });
        if !supports {
            return Err(SinkError::UnsupportedFormat(format));
        }

        let rb = HeapRb::<i16>::new(RING_FRAMES * format.channels as usize);
        let (producer, mut consumer) = rb.split();
        let paused = self.paused.clone();

        let stream_config: cpal::StreamConfig = wanted.into();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    if paused.load(Ordering::Acquire) {
                        data.fill(0);
                        return;
                    }
                    let filled = consumer.pop_slice(data);
                    if filled < data.len() {
                        data[filled..].fill(0);
                    }
                },
                |err| tracing::error!(%err, "cpal output stream error"),
                None,
            )
            .map_err(|e| SinkError::Device(e.to_string()))?;
        stream.play().map_err(|e| SinkError::Device(e.to_string()))?;

        self.stream = Some(stream);
        self.producer = Some(producer);
        self.format = Some(format);
        self.pending.clear();
        Ok(())
    }

    fn ensure_open(&mut self, format: AudioFormat) -> Result<(), SinkError> {
        if self.stream.is_some() && self.format == Some(format) {
            return Ok(());
        }
        if let Some(last) = self.last_open_attempt {
            if last.elapsed() < REOPEN_BACKOFF {
                return Err(SinkError::Device("backing off after a recent open failure".into()));
            }
        }
        self.last_open_attempt = Some(Instant::now());
        self.open_device(format)
    }

    fn samples_to_i16(format: AudioFormat, bytes: &[u8], swap: bool) -> Vec<i16> {
        let bps = format.bytes_per_sample();
        bytes
            .chunks(bps)
            .map(|chunk| {
                let mut buf = [0u8; 2];
                let n = chunk.len().min(2);
                buf[..n].copy_from_slice(&chunk[..n]);
                if swap {
                    buf.reverse();
                }
                i16::from_le_bytes(buf)
            })
            .collect()
    }
}

impl Sink for PcmSink {
    fn start(&mut self, format: AudioFormat) -> Result<(), SinkError> {
        self.ensure_open(format)
    }

    fn add_packet(&mut self, packet: &AudioPacket, offset: usize) -> Result<AddPacketResult, SinkError> {
        let format = packet.format;
        self.ensure_open(format)?;

        let data = packet.data.as_ref().ok_or_else(|| {
            SinkError::Device("packet has no data attached".to_string())
        })?;
        if offset >= data.len() {
            return Ok(AddPacketResult {
                bytes_consumed: 0,
                playing: Some(packet.info()),
            });
        }

        let period_samples = PERIOD_FRAMES * format.channels as usize;
        let producer = self.producer.as_mut().ok_or(SinkError::NoDevice)?;

        // Keep at most one period's worth of backlog beyond whatever the
        // device can take right now. Without this cap, converting and
        // staging the packet's full remainder on every call (regardless of
        // how much actually reached the ring buffer) would re-stage the
        // same unconsumed tail on the next call, duplicating audio and
        // growing `pending` without bound while the device is paused or
        // slow to drain.
        let backlog_cap = period_samples + producer.vacant_len();
        if self.pending.len() >= backlog_cap {
            return Ok(AddPacketResult {
                bytes_consumed: 0,
                playing: Some(packet.info()),
            });
        }

        // Host is little-endian on every platform cpal targets here; swap
        // only when the packet's format says the bytes arrived big-endian.
        let swap = format.big_endian;
        let bytes_per_sample = format.bytes_per_sample();
        let room_samples = backlog_cap - self.pending.len();
        let available_samples = (data.len() - offset) / bytes_per_sample;
        let take_samples = room_samples.min(available_samples);
        let take_bytes = take_samples * bytes_per_sample;

        let new_samples = Self::samples_to_i16(format, &data[offset..offset + take_bytes], swap);
        self.pending.extend(new_samples);

        while self.pending.len() >= period_samples {
            let vacant = producer.vacant_len();
            if vacant < period_samples {
                break;
            }
            let period: Vec<i16> = self.pending.drain(..period_samples).collect();
            let _ = producer.push_slice(&period);
        }

        *self.last_playing.lock().unwrap() = Some(packet.info());
        Ok(AddPacketResult {
            bytes_consumed: take_bytes,
            playing: Some(packet.info()),
        })
    }

    fn pause(&mut self) -> bool {
        if self.stream.is_none() {
            return false;
        }
        self.paused.store(true, Ordering::Release);
        true
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        self.stream = None;
        self.producer = None;
        self.pending.clear();
        self.paused.store(false, Ordering::Release);
        *self.last_playing.lock().unwrap() = None;
    }

    fn drain(&mut self) -> Result<DrainResult, SinkError> {
        if !self.pending.is_empty() {
            if let Some(producer) = self.producer.as_mut() {
                let remainder: Vec<i16> = self.pending.drain(..).collect();
                producer.push_slice(&remainder);
            } else {
                self.pending.clear();
            }
        }
        match self.producer.as_ref() {
            Some(producer) if producer.occupied_len() > 0 => {
                Ok(DrainResult::Playing(self.last_playing.lock().unwrap().clone()))
            }
            _ => Ok(DrainResult::Done),
        }
    }
}
