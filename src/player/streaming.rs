//! The background streaming task: one thread per handle generation that pulls
//! chunks from the player's source and pushes them into the sink handle.

use super::Shared;
use crate::error::{PetalStreamError, Result};
use std::io::{ErrorKind, Read};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// The player's byte source plus a chunk left behind by a superseded task.
///
/// Held by a task from the moment it reads until the chunk is written or stashed,
/// so chunks from consecutive generations can never reorder.
pub(crate) struct Feed {
    pub(crate) source: Box<dyn Read + Send>,
    pub(crate) carry: Option<Vec<u8>>,
}

impl Feed {
    pub(crate) fn new(source: Box<dyn Read + Send>) -> Self {
        Self {
            source,
            carry: None,
        }
    }
}

/// Start the task for `generation`. Must be called with the transport lock held,
/// right after the generation's handle was installed.
pub(crate) fn spawn(shared: Arc<Shared>, generation: u64) -> Result<()> {
    let name = format!("petalstream-{}-gen{}", shared.id.short(), generation);
    shared.active_tasks.fetch_add(1, Ordering::SeqCst);
    let task_shared = shared.clone();
    let spawned = std::thread::Builder::new()
        .name(name)
        .spawn(move || run(task_shared, generation));

    match spawned {
        Ok(_) => Ok(()),
        Err(e) => {
            shared.active_tasks.fetch_sub(1, Ordering::SeqCst);
            Err(PetalStreamError::Sink(format!(
                "Failed to spawn streaming task: {}",
                e
            )))
        }
    }
}

fn run(shared: Arc<Shared>, generation: u64) {
    log::debug!(
        "Player {} streaming task started (generation {})",
        shared.id,
        generation
    );

    let mut buf = vec![0u8; shared.chunk_size];
    while shared.wait_until_unpaused(generation) {
        if step(&shared, generation, &mut buf).is_break() {
            break;
        }
    }

    shared.active_tasks.fetch_sub(1, Ordering::SeqCst);
    log::debug!(
        "Player {} streaming task exited (generation {})",
        shared.id,
        generation
    );
}

/// One read+write cycle
fn step(shared: &Shared, generation: u64, buf: &mut [u8]) -> ControlFlow<()> {
    let mut feed = shared.feed.lock();

    if let Some(carry) = feed.carry.take() {
        return shared.deliver(generation, &mut feed, &carry);
    }

    match feed.source.read(buf) {
        Ok(0) => {
            shared.finish_generation(generation);
            ControlFlow::Break(())
        }
        Ok(n) => shared.deliver(generation, &mut feed, &buf[..n]),
        Err(e) if e.kind() == ErrorKind::Interrupted => ControlFlow::Continue(()),
        Err(e) => {
            log::error!("Player {} source read failed: {}", shared.id, e);
            shared.set_error(e.into());
            ControlFlow::Break(())
        }
    }
}
