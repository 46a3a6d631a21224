//! Platform sink backed by a cpal output stream.

use super::{AudioSink, SinkHandle, WrittenCallback};
use crate::config::PetalStreamConfig;
use crate::error::{PetalStreamError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Extra time granted to a soft close on top of the queued audio's duration
const DRAIN_GRACE: Duration = Duration::from_millis(200);
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Sink that plays through the default cpal output device.
///
/// Every handle gets its own output stream, owned by a dedicated thread and driven
/// through a command channel, so handles stay `Send` on hosts whose streams are not.
pub struct CpalSink {
    config: PetalStreamConfig,
}

impl CpalSink {
    pub fn new(config: PetalStreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PetalStreamConfig {
        &self.config
    }
}

impl AudioSink for CpalSink {
    fn create_handle(&self, on_written: WrittenCallback) -> Result<Box<dyn SinkHandle>> {
        let queue = Arc::new(Mutex::new(StreamQueue {
            bytes: VecDeque::with_capacity(self.config.buffer_size + self.config.chunk_size),
            volume: 1.0,
        }));
        let (command_sender, command_receiver) = crossbeam_channel::unbounded();
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded(1);

        let config = self.config.clone();
        let thread_queue = queue.clone();
        std::thread::Builder::new()
            .name("petalstream-sink".into())
            .spawn(move || {
                run_stream_thread(
                    config,
                    thread_queue,
                    on_written,
                    command_receiver,
                    ready_sender,
                )
            })
            .map_err(|e| {
                PetalStreamError::AudioDevice(format!("Failed to spawn sink thread: {}", e))
            })?;

        ready_receiver.recv().map_err(|_| {
            PetalStreamError::AudioDevice("Sink thread exited before opening a stream".into())
        })??;

        Ok(Box::new(CpalSinkHandle {
            queue,
            commands: command_sender,
            capacity: self.config.buffer_size,
            closed: false,
        }))
    }
}

struct StreamQueue {
    bytes: VecDeque<u8>,
    volume: f32,
}

#[derive(Debug)]
enum SinkCommand {
    Play,
    Pause,
    Close { discard_pending: bool },
}

struct CpalSinkHandle {
    queue: Arc<Mutex<StreamQueue>>,
    commands: Sender<SinkCommand>,
    capacity: usize,
    closed: bool,
}

impl CpalSinkHandle {
    fn send(&self, command: SinkCommand) {
        if let Err(e) = self.commands.send(command) {
            log::warn!("Sink stream thread is gone, dropping {:?}", e.into_inner());
        }
    }
}

impl SinkHandle for CpalSinkHandle {
    fn play(&mut self) {
        if !self.closed {
            self.send(SinkCommand::Play);
        }
    }

    fn pause(&mut self) {
        if !self.closed {
            self.send(SinkCommand::Pause);
        }
    }

    fn close(&mut self, discard_pending: bool) {
        if self.closed {
            return;
        }
        self.closed = true;
        if discard_pending {
            self.queue.lock().bytes.clear();
        }
        self.send(SinkCommand::Close { discard_pending });
    }

    fn write(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.queue.lock().bytes.extend(data.iter().copied());
    }

    fn is_writable(&self) -> bool {
        !self.closed && self.queue.lock().bytes.len() < self.capacity
    }

    fn volume(&self) -> f32 {
        self.queue.lock().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.queue.lock().volume = volume;
    }
}

impl Drop for CpalSinkHandle {
    fn drop(&mut self) {
        self.close(true);
    }
}

fn run_stream_thread(
    config: PetalStreamConfig,
    queue: Arc<Mutex<StreamQueue>>,
    on_written: WrittenCallback,
    commands: Receiver<SinkCommand>,
    ready: Sender<Result<()>>,
) {
    let stream = match open_stream(&config, queue.clone(), on_written) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Failed to open output stream: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    // Some hosts start streams as soon as they are built
    if let Err(e) = stream.pause() {
        log::debug!("Output stream could not be paused after build: {}", e);
    }
    let _ = ready.send(Ok(()));

    for command in commands.iter() {
        match command {
            SinkCommand::Play => {
                if let Err(e) = stream.play() {
                    log::error!("Failed to start output stream: {}", e);
                }
            }
            SinkCommand::Pause => {
                if let Err(e) = stream.pause() {
                    log::error!("Failed to pause output stream: {}", e);
                }
            }
            SinkCommand::Close { discard_pending } => {
                if !discard_pending {
                    wait_for_drain(&queue, &config);
                }
                break;
            }
        }
    }

    drop(stream);
    log::debug!("Output stream closed");
}

fn wait_for_drain(queue: &Mutex<StreamQueue>, config: &PetalStreamConfig) {
    let queued = queue.lock().bytes.len();
    let bytes_per_second = config.bytes_per_second().max(1);
    let deadline = Instant::now()
        + Duration::from_secs_f64(queued as f64 / bytes_per_second as f64)
        + DRAIN_GRACE;

    while !is_drained(&queue.lock(), config.bit_depth_in_bytes) {
        if Instant::now() >= deadline {
            log::warn!(
                "Output stream closed with {} bytes still queued",
                queue.lock().bytes.len()
            );
            return;
        }
        std::thread::sleep(DRAIN_POLL);
    }
}

/// A trailing partial sample can never be played, so it does not count as queued
fn is_drained(queue: &StreamQueue, bit_depth_in_bytes: u16) -> bool {
    queue.bytes.len() < usize::from(bit_depth_in_bytes.max(1))
}

fn open_stream(
    config: &PetalStreamConfig,
    queue: Arc<Mutex<StreamQueue>>,
    on_written: WrittenCallback,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        PetalStreamError::AudioDevice("No default output device available".into())
    })?;

    let default_config = device.default_output_config().map_err(|e| {
        PetalStreamError::AudioDevice(format!("Failed to get default config: {}", e))
    })?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let bit_depth = config.bit_depth_in_bytes;

    match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, bit_depth, queue, on_written)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, bit_depth, queue, on_written)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, bit_depth, queue, on_written)
        }
        other => Err(PetalStreamError::AudioFormat(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bit_depth_in_bytes: u16,
    queue: Arc<Mutex<StreamQueue>>,
    on_written: WrittenCallback,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let consumed = {
                    let mut queue = queue.lock();
                    fill_output(&mut queue, data, bit_depth_in_bytes)
                };
                // Queue lock released first: the callback takes the player lock
                if consumed > 0 {
                    on_written.notify();
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| PetalStreamError::AudioDevice(format!("Failed to build stream: {}", e)))
}

/// Fill `data` from the queue, padding with silence. Returns the bytes consumed.
fn fill_output<T>(queue: &mut StreamQueue, data: &mut [T], bit_depth_in_bytes: u16) -> usize
where
    T: SizedSample + FromSample<f32>,
{
    let before = queue.bytes.len();
    let volume = queue.volume;
    for sample in data.iter_mut() {
        let value = decode_sample(&mut queue.bytes, bit_depth_in_bytes).unwrap_or(0.0);
        *sample = T::from_sample(value * volume);
    }
    before - queue.bytes.len()
}

/// Pop one PCM sample off the front of the queue as `f32` in `[-1, 1]`.
fn decode_sample(bytes: &mut VecDeque<u8>, bit_depth_in_bytes: u16) -> Option<f32> {
    match bit_depth_in_bytes {
        1 => bytes.pop_front().map(|b| (b as f32 - 128.0) / 128.0),
        _ => {
            if bytes.len() < 2 {
                return None;
            }
            let lo = bytes.pop_front()?;
            let hi = bytes.pop_front()?;
            Some(i16::from_le_bytes([lo, hi]) as f32 / 32768.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_16_bit_little_endian() {
        let mut bytes: VecDeque<u8> = [0x00, 0x40, 0x00, 0x80, 0x01].into_iter().collect();
        assert_eq!(decode_sample(&mut bytes, 2), Some(0.5));
        assert_eq!(decode_sample(&mut bytes, 2), Some(-1.0));
        // a trailing half sample stays queued
        assert_eq!(decode_sample(&mut bytes, 2), None);
        assert_eq!(bytes.len(), 1);
    }

    #[test]
    fn decodes_unsigned_8_bit() {
        let mut bytes: VecDeque<u8> = [128, 0, 192].into_iter().collect();
        assert_eq!(decode_sample(&mut bytes, 1), Some(0.0));
        assert_eq!(decode_sample(&mut bytes, 1), Some(-1.0));
        assert_eq!(decode_sample(&mut bytes, 1), Some(0.5));
        assert_eq!(decode_sample(&mut bytes, 1), None);
    }

    #[test]
    fn fill_applies_volume_and_pads_with_silence() {
        let mut queue = StreamQueue {
            bytes: [0x00, 0x40].into_iter().collect(),
            volume: 0.5,
        };
        let mut out = [1.0f32; 3];

        let consumed = fill_output(&mut queue, &mut out, 2);

        assert_eq!(consumed, 2);
        assert_eq!(out, [0.25, 0.0, 0.0]);
        assert!(queue.bytes.is_empty());
    }

    #[test]
    fn half_sample_left_over_counts_as_drained() {
        let queue = Mutex::new(StreamQueue {
            bytes: [0x7f].into_iter().collect(),
            volume: 1.0,
        });
        assert!(is_drained(&queue.lock(), 2));
        assert!(!is_drained(&queue.lock(), 1));

        let started = Instant::now();
        wait_for_drain(&queue, &PetalStreamConfig::default());
        assert!(started.elapsed() < DRAIN_GRACE);
    }

    #[test]
    fn handle_writability_tracks_capacity() {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let mut handle = CpalSinkHandle {
            queue: Arc::new(Mutex::new(StreamQueue {
                bytes: VecDeque::new(),
                volume: 1.0,
            })),
            commands,
            capacity: 4,
            closed: false,
        };

        handle.write(&[0; 4]);
        assert!(!handle.is_writable());
        handle.queue.lock().bytes.clear();
        assert!(handle.is_writable());

        handle.play();
        handle.close(true);
        handle.close(true);
        assert!(!handle.is_writable());
        let sent: Vec<_> = receiver.try_iter().collect();
        assert!(matches!(sent[0], SinkCommand::Play));
        assert!(matches!(
            sent[1],
            SinkCommand::Close {
                discard_pending: true
            }
        ));
        assert_eq!(sent.len(), 2);
    }
}
