//! Player transport control and state management.
//!
//! A [`Player`] arbitrates between transport calls from any number of threads and
//! one background streaming task per handle generation:
//! - [`Player::play`] opens a sink handle if there is none and starts a task for it
//! - [`Player::pause`] parks the task without stopping it
//! - [`Player::reset`] hard-closes the handle; the next `play` opens a new one
//! - [`Player::close`] ends the player for good and reports the first fatal error
//!
//! Everything mutable lives behind one mutex, paired with one condition variable
//! that is signaled on every state change. The streaming task only ever sleeps on
//! that condition; transport calls never block beyond taking the lock, apart from
//! `play` waiting on the sink to open a handle.

mod streaming;


use crate::error::{PetalStreamError, Result};
use crate::sink::{AudioSink, SinkHandle, WrittenCallback};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io::Read;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use streaming::Feed;
use uuid::Uuid;

/// Identifies a player in logs and thread names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlayerId(Uuid);

impl PlayerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    fn short(&self) -> String {
        let mut simple = self.0.simple().to_string();
        simple.truncate(8);
        simple
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PlayerId({})", self.0)
    }
}

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    /// Not consuming the source; the initial state and the state after end-of-stream
    Paused,
    /// Streaming the source into the sink as fast as the sink accepts it
    Playing,
    /// Terminal; every transport call is a no-op
    Closed,
}

struct Transport {
    state: PlayState,
    handle: Option<Box<dyn SinkHandle>>,
    /// Bumped every time a handle is opened
    generation: u64,
    /// Last volume applied while a handle was open
    volume: f32,
    error: Option<PetalStreamError>,
}

impl Transport {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.handle.is_some()
    }
}

pub(crate) struct Shared {
    id: PlayerId,
    transport: Mutex<Transport>,
    cond: Condvar,
    written: WrittenCallback,
    sink: Arc<dyn AudioSink>,
    chunk_size: usize,
    feed: Mutex<Feed>,
    active_tasks: AtomicUsize,
}

impl Shared {
    /// Wake the streaming task after the sink drained data.
    ///
    /// Taking the lock orders the wake-up after any in-flight writability check,
    /// so it cannot land between that check and the task going to sleep.
    fn signal_written(&self) {
        let _transport = self.transport.lock();
        self.cond.notify_all();
    }

    /// Block until the task for `generation` may write, or must stop.
    /// Returns `true` when it may proceed.
    fn wait_until_unpaused(&self, generation: u64) -> bool {
        let mut transport = self.transport.lock();
        loop {
            if !transport.is_current(generation) {
                return false;
            }
            let writable = transport
                .handle
                .as_ref()
                .is_some_and(|handle| handle.is_writable());
            match transport.state {
                PlayState::Playing if writable => return true,
                PlayState::Playing | PlayState::Paused => {}
                PlayState::Closed => return false,
            }
            self.cond.wait(&mut transport);
        }
    }

    /// Write a chunk for `generation`, or leave it for the next generation's task
    /// if this one was superseded while reading.
    fn deliver(&self, generation: u64, feed: &mut Feed, bytes: &[u8]) -> ControlFlow<()> {
        let mut transport = self.transport.lock();
        if transport.state == PlayState::Closed {
            return ControlFlow::Break(());
        }
        if transport.generation == generation {
            if let Some(handle) = transport.handle.as_mut() {
                handle.write(bytes);
                return ControlFlow::Continue(());
            }
        }

        log::debug!(
            "Player {} generation {} superseded, carrying {} bytes over",
            self.id,
            generation,
            bytes.len()
        );
        feed.carry = Some(bytes.to_vec());
        ControlFlow::Break(())
    }

    /// Soft close on end-of-stream, unless the generation was already superseded
    fn finish_generation(&self, generation: u64) {
        let mut transport = self.transport.lock();
        if !transport.is_current(generation) {
            return;
        }
        log::debug!("Player {} reached end of stream", self.id);
        let _ = self.close_locked(&mut transport, false);
    }

    fn close(&self, hard: bool) -> Result<()> {
        let mut transport = self.transport.lock();
        self.close_locked(&mut transport, hard)
    }

    fn close_locked(&self, transport: &mut Transport, hard: bool) -> Result<()> {
        if transport.state == PlayState::Closed {
            return sticky(transport);
        }

        if let Some(mut handle) = transport.handle.take() {
            handle.close(hard);
        }
        if hard {
            transport.state = PlayState::Closed;
            self.written.release();
            log::debug!("Player {} closed", self.id);
        } else {
            transport.state = PlayState::Paused;
        }
        self.cond.notify_all();
        sticky(transport)
    }

    fn set_error(&self, err: PetalStreamError) {
        let mut transport = self.transport.lock();
        self.fail_locked(&mut transport, err);
    }

    /// Record a fatal error and close for good. Errors arriving after the player
    /// already closed are dropped, so `close` keeps returning what it returned first.
    fn fail_locked(&self, transport: &mut Transport, err: PetalStreamError) {
        if transport.state == PlayState::Closed {
            log::debug!("Player {} ignoring error after close: {}", self.id, err);
            return;
        }

        if let Some(mut handle) = transport.handle.take() {
            handle.close(true);
        }
        if transport.error.is_none() {
            transport.error = Some(err);
        }
        transport.state = PlayState::Closed;
        self.written.release();
        self.cond.notify_all();
    }
}

fn sticky(transport: &Transport) -> Result<()> {
    match &transport.error {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

/// Streams a byte source into a sink, one handle generation at a time.
///
/// Created paused through [`AudioContext::new_player`](crate::AudioContext::new_player).
/// All methods take `&self`; share the player across threads with an `Arc`.
///
/// Dropping a player that was never [`close`](Self::close)d closes it, but the
/// sticky error is then lost. Call `close` to observe it.
pub struct Player {
    shared: Arc<Shared>,
    finalize_on_drop: AtomicBool,
}

impl Player {
    pub(crate) fn new(
        sink: Arc<dyn AudioSink>,
        source: Box<dyn Read + Send>,
        chunk_size: usize,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let written = WrittenCallback::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.signal_written();
                }
            });

            Shared {
                id: PlayerId::new(),
                transport: Mutex::new(Transport {
                    state: PlayState::Paused,
                    handle: None,
                    generation: 0,
                    volume: 1.0,
                    error: None,
                }),
                cond: Condvar::new(),
                written,
                sink,
                chunk_size,
                feed: Mutex::new(Feed::new(source)),
                active_tasks: AtomicUsize::new(0),
            }
        });
        log::debug!("Player {} created", shared.id);

        Self {
            shared,
            finalize_on_drop: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.shared.id
    }

    pub fn state(&self) -> PlayState {
        self.shared.transport.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlayState::Playing
    }

    /// Start or resume playback.
    ///
    /// Opens a sink handle and starts its streaming task when none is open. If the
    /// handle cannot be opened the player closes, and [`close`](Self::close) reports why.
    pub fn play(&self) {
        let shared = &self.shared;
        let mut transport = shared.transport.lock();
        if transport.state == PlayState::Closed {
            return;
        }
        if transport.handle.is_none() && !self.open_handle(&mut transport) {
            return;
        }

        if let Some(handle) = transport.handle.as_mut() {
            handle.play();
        }
        transport.state = PlayState::Playing;
        shared.cond.notify_all();
    }

    /// Open a handle for a new generation and start its task. Returns `false` when
    /// the player closed instead.
    ///
    /// The sink is asked for the handle with the lock released: opening a device can
    /// block on its audio thread, and that thread's written callback takes the lock.
    fn open_handle(&self, transport: &mut MutexGuard<'_, Transport>) -> bool {
        let shared = &self.shared;
        let opened = MutexGuard::unlocked(transport, || {
            shared.sink.create_handle(shared.written.clone())
        });
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Player {} failed to open a sink handle: {}", shared.id, e);
                shared.fail_locked(transport, e);
                return false;
            }
        };

        if transport.state == PlayState::Closed {
            log::debug!("Player {} closed while a handle was opening", shared.id);
            handle.close(true);
            return false;
        }
        if transport.handle.is_some() {
            // a concurrent play installed its handle first
            handle.close(true);
            return true;
        }

        handle.set_volume(transport.volume);
        transport.generation += 1;
        transport.handle = Some(handle);

        let generation = transport.generation;
        log::debug!("Player {} opened handle generation {}", shared.id, generation);
        if let Err(e) = streaming::spawn(shared.clone(), generation) {
            log::error!("Player {}: {}", shared.id, e);
            shared.fail_locked(transport, e);
            return false;
        }
        true
    }

    /// Pause playback. Does nothing unless a handle is open.
    pub fn pause(&self) {
        let mut transport = self.shared.transport.lock();
        if transport.state == PlayState::Closed {
            return;
        }
        let Some(handle) = transport.handle.as_mut() else {
            return;
        };

        handle.pause();
        transport.state = PlayState::Paused;
        self.shared.cond.notify_all();
    }

    /// Drop the open handle and everything queued in it, keeping the current state.
    ///
    /// The source is not rewound: the next [`play`](Self::play) opens a new handle
    /// and continues from wherever the source currently is. Rewinding is up to
    /// whoever owns the source.
    pub fn reset(&self) {
        let mut transport = self.shared.transport.lock();
        if transport.state == PlayState::Closed {
            return;
        }
        let Some(mut handle) = transport.handle.take() else {
            return;
        };

        handle.close(true);
        log::debug!(
            "Player {} reset handle generation {}",
            self.shared.id,
            transport.generation
        );
        self.shared.cond.notify_all();
    }

    /// Live volume of the open handle, or the cached volume when none is open
    pub fn volume(&self) -> f32 {
        let transport = self.shared.transport.lock();
        match transport.handle.as_ref() {
            Some(handle) => handle.volume(),
            None => transport.volume,
        }
    }

    /// Set the volume of the open handle.
    ///
    /// Without an open handle this does nothing, and the cached volume that the
    /// next handle starts with stays as it was.
    pub fn set_volume(&self, volume: f32) {
        let mut transport = self.shared.transport.lock();
        let Some(handle) = transport.handle.as_mut() else {
            return;
        };
        handle.set_volume(volume);
        transport.volume = volume;
    }

    /// Close the player for good.
    ///
    /// Idempotent and safe to call from several threads; every call returns the
    /// first fatal error the player ran into, if any.
    pub fn close(&self) -> Result<()> {
        self.finalize_on_drop.store(false, Ordering::SeqCst);
        self.shared.close(true)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if !self.finalize_on_drop.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.shared.transport.lock().state != PlayState::Closed {
            log::warn!("Player {} dropped without close(), closing it", self.shared.id);
        }
        if let Err(e) = self.shared.close(true) {
            log::warn!("Player {} dropped with unreported error: {}", self.shared.id, e);
        }
    }
}
