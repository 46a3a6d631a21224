//! # PetalStream
//!
//! Streams raw PCM from any [`std::io::Read`] into an audio output, pacing the
//! reader by how fast the output drains instead of by timers or busy loops.
//!
//! ## Quick Start
//!
//! ```no_run
//! use petalstream::*;
//! use std::fs::File;
//!
//! // 48 kHz, stereo, signed 16-bit little-endian
//! let context = AudioContext::new(PetalStreamConfig::default())?;
//!
//! let player = context.new_player(File::open("music.pcm")?);
//! player.play();
//! player.set_volume(0.5);
//!
//! // ... later
//! player.pause();
//! player.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`AudioContext`]**: fixes the PCM layout and the sink, creates players
//! - **[`Player`]**: transport control (play, pause, reset, volume, close)
//! - **[`AudioSink`](sink::AudioSink) / [`SinkHandle`](sink::SinkHandle)**: the output
//!   side; [`CpalSink`](sink::CpalSink) for real devices,
//!   [`MemorySink`](sink::MemorySink) for capture and tests
//!
//! ## Threading
//!
//! Each player runs one background streaming thread per sink handle it opens. The
//! thread sleeps on a condition variable while the player is paused or the sink is
//! full, and is woken by transport calls and by the sink draining. Read errors on
//! the source close the player; [`Player::close`] reports them.

pub mod config;
pub mod context;
pub mod error;
pub mod player;
pub mod sink;

pub use config::PetalStreamConfig;
pub use context::AudioContext;
pub use error::{PetalStreamError, Result};
pub use player::{PlayState, Player, PlayerId};
