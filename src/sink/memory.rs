//! In-memory sink that records everything written to it.
//!
//! Useful for headless capture and for driving players deterministically: the
//! writability of each handle can be bounded by a byte capacity or gated by hand,
//! and [`MemoryProbe`] exposes what each handle received.

use super::{AudioSink, SinkHandle, WrittenCallback};
use crate::error::{PetalStreamError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// How a memory handle decides whether it is writable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writability {
    /// Always writable while open
    Always,
    /// Writable while fewer than this many bytes are queued; [`MemoryProbe::drain`]
    /// empties the queue
    Capacity(usize),
    /// Starts closed; toggled with [`MemoryProbe::set_writable`]
    Manual,
}

/// A call a player made on a memory handle
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Play,
    Pause,
    Write(usize),
    SetVolume(f32),
    Close { discard_pending: bool },
}

struct MemoryHandleState {
    writability: Writability,
    gate_open: bool,
    written: Vec<u8>,
    queued: usize,
    events: Vec<SinkEvent>,
    volume: f32,
    playing: bool,
    closed: bool,
}

/// Inspection and control side of one memory handle.
#[derive(Clone)]
pub struct MemoryProbe {
    state: Arc<Mutex<MemoryHandleState>>,
    on_written: WrittenCallback,
}

impl MemoryProbe {
    /// All bytes written to the handle, in order
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state.lock().events.clone()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queued
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// The `discard_pending` flag of the close call, if the handle was closed
    pub fn close_mode(&self) -> Option<bool> {
        self.state.lock().events.iter().find_map(|event| match event {
            SinkEvent::Close { discard_pending } => Some(*discard_pending),
            _ => None,
        })
    }

    /// Pretend the output consumed everything queued, then fire the callback
    pub fn drain(&self) {
        self.state.lock().queued = 0;
        self.on_written.notify();
    }

    /// Open or close the gate of a [`Writability::Manual`] handle, then fire the callback
    pub fn set_writable(&self, writable: bool) {
        self.state.lock().gate_open = writable;
        self.on_written.notify();
    }
}

struct MemoryHandle {
    probe: MemoryProbe,
}

impl SinkHandle for MemoryHandle {
    fn play(&mut self) {
        let mut state = self.probe.state.lock();
        state.playing = true;
        state.events.push(SinkEvent::Play);
    }

    fn pause(&mut self) {
        let mut state = self.probe.state.lock();
        state.playing = false;
        state.events.push(SinkEvent::Pause);
    }

    fn close(&mut self, discard_pending: bool) {
        let mut state = self.probe.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.playing = false;
        if discard_pending {
            state.queued = 0;
        }
        state.events.push(SinkEvent::Close { discard_pending });
    }

    fn write(&mut self, data: &[u8]) {
        let mut state = self.probe.state.lock();
        if state.closed {
            log::warn!("Dropping {} bytes written to a closed memory handle", data.len());
            return;
        }
        state.written.extend_from_slice(data);
        state.queued += data.len();
        state.events.push(SinkEvent::Write(data.len()));
    }

    fn is_writable(&self) -> bool {
        let state = self.probe.state.lock();
        if state.closed {
            return false;
        }
        match state.writability {
            Writability::Always => true,
            Writability::Capacity(capacity) => state.queued < capacity,
            Writability::Manual => state.gate_open,
        }
    }

    fn volume(&self) -> f32 {
        self.probe.state.lock().volume
    }

    fn set_volume(&mut self, volume: f32) {
        let mut state = self.probe.state.lock();
        state.volume = volume;
        state.events.push(SinkEvent::SetVolume(volume));
    }
}

struct MemorySinkInner {
    writability: Writability,
    handles: Vec<MemoryProbe>,
    fail_next: Option<String>,
}

/// Sink that keeps every handle's output in memory.
///
/// Clones share the same recording, so a clone can be handed to a context while
/// another is kept for inspection.
#[derive(Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkInner>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_writability(Writability::Always)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_writability(Writability::Capacity(capacity))
    }

    pub fn gated() -> Self {
        Self::with_writability(Writability::Manual)
    }

    pub fn with_writability(writability: Writability) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemorySinkInner {
                writability,
                handles: Vec::new(),
                fail_next: None,
            })),
        }
    }

    /// Make the next `create_handle` call fail with a device error
    pub fn fail_next_create(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }

    /// Probes for every handle opened so far, oldest first
    pub fn handles(&self) -> Vec<MemoryProbe> {
        self.inner.lock().handles.clone()
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn latest(&self) -> Option<MemoryProbe> {
        self.inner.lock().handles.last().cloned()
    }

    /// Bytes written across all handles, oldest handle first
    pub fn written(&self) -> Vec<u8> {
        self.handles()
            .iter()
            .flat_map(|probe| probe.written())
            .collect()
    }
}

impl AudioSink for MemorySink {
    fn create_handle(&self, on_written: WrittenCallback) -> Result<Box<dyn SinkHandle>> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.fail_next.take() {
            return Err(PetalStreamError::AudioDevice(message));
        }

        let probe = MemoryProbe {
            state: Arc::new(Mutex::new(MemoryHandleState {
                writability: inner.writability,
                gate_open: false,
                written: Vec::new(),
                queued: 0,
                events: Vec::new(),
                volume: 1.0,
                playing: false,
                closed: false,
            })),
            on_written,
        };
        inner.handles.push(probe.clone());
        log::debug!("Memory sink opened handle #{}", inner.handles.len());

        Ok(Box::new(MemoryHandle { probe }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback() -> (WrittenCallback, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = WrittenCallback::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, calls)
    }

    #[test]
    fn capacity_handle_blocks_until_drained() {
        let sink = MemorySink::with_capacity(4);
        let (callback, calls) = counting_callback();
        let mut handle = sink.create_handle(callback).unwrap();

        assert!(handle.is_writable());
        handle.write(&[1, 2, 3, 4]);
        assert!(!handle.is_writable());

        let probe = sink.latest().unwrap();
        probe.drain();
        assert!(handle.is_writable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.written(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn gated_handle_follows_the_gate() {
        let sink = MemorySink::gated();
        let handle = sink.create_handle(WrittenCallback::noop()).unwrap();
        let probe = sink.latest().unwrap();

        assert!(!handle.is_writable());
        probe.set_writable(true);
        assert!(handle.is_writable());
        probe.set_writable(false);
        assert!(!handle.is_writable());
    }

    #[test]
    fn closed_handle_ignores_writes_and_records_close_once() {
        let sink = MemorySink::new();
        let mut handle = sink.create_handle(WrittenCallback::noop()).unwrap();

        handle.write(&[9]);
        handle.close(true);
        handle.close(false);
        handle.write(&[10]);

        let probe = sink.latest().unwrap();
        assert!(probe.is_closed());
        assert!(!handle.is_writable());
        assert_eq!(probe.written(), vec![9]);
        assert_eq!(probe.close_mode(), Some(true));
        assert_eq!(
            probe.events(),
            vec![SinkEvent::Write(1), SinkEvent::Close { discard_pending: true }]
        );
    }

    #[test]
    fn failing_create_only_fails_once() {
        let sink = MemorySink::new();
        sink.fail_next_create("no device");

        let err = sink.create_handle(WrittenCallback::noop()).err();
        assert!(matches!(err, Some(PetalStreamError::AudioDevice(_))));
        assert!(sink.create_handle(WrittenCallback::noop()).is_ok());
        assert_eq!(sink.handle_count(), 1);
    }
}
