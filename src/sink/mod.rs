//! Audio sinks: the platform side a player streams into.
//!
//! A sink is split in two:
//! - [`AudioSink`]: a factory that opens one [`SinkHandle`] per handle generation
//! - [`SinkHandle`]: a live connection that accepts PCM bytes and reports whether
//!   it can take more
//!
//! Handles are only ever driven while the owning player holds its lock, so
//! implementations must not call back into the player synchronously from these
//! methods. The [`WrittenCallback`] is the one way back: sinks invoke it from their
//! own threads once queued audio has been consumed.

mod cpal_sink;
mod memory;

pub use cpal_sink::CpalSink;
pub use memory::{MemoryProbe, MemorySink, SinkEvent, Writability};

use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Factory for sink handles.
pub trait AudioSink: Send + Sync {
    /// Open a new handle. `on_written` must be invoked whenever the handle drains
    /// queued data, so a producer blocked on [`SinkHandle::is_writable`] can re-poll.
    fn create_handle(&self, on_written: WrittenCallback) -> Result<Box<dyn SinkHandle>>;
}

/// A live connection to an audio output.
pub trait SinkHandle: Send {
    /// Start or resume consuming queued audio
    fn play(&mut self);

    /// Stop consuming queued audio, keeping it queued
    fn pause(&mut self);

    /// Close the connection. With `discard_pending`, queued audio is dropped;
    /// otherwise it is allowed to play out first.
    fn close(&mut self, discard_pending: bool);

    /// Queue PCM bytes for output
    fn write(&mut self, data: &[u8]);

    /// Whether the handle currently wants more data
    fn is_writable(&self) -> bool;

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);
}

/// Write-completion callback registration handed to every sink handle.
///
/// Once [`release`](Self::release)d, [`notify`](Self::notify) becomes a no-op for
/// every clone, so a sink that outlives its player cannot wake it.
#[derive(Clone)]
pub struct WrittenCallback {
    func: Arc<dyn Fn() + Send + Sync>,
    released: Arc<AtomicBool>,
}

impl WrittenCallback {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A callback that never does anything, for handles opened outside a player
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn notify(&self) {
        if !self.released.load(Ordering::Acquire) {
            (self.func)();
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WrittenCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrittenCallback")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn released_callback_stops_firing_for_all_clones() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = WrittenCallback::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = callback.clone();

        clone.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        callback.release();
        clone.notify();
        callback.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clone.is_released());
    }
}
