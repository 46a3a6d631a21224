//! Audio context: opens sink handles and creates players bound to them.

use crate::config::PetalStreamConfig;
use crate::error::Result;
use crate::player::Player;
use crate::sink::{AudioSink, CpalSink};
use std::io::Read;
use std::sync::Arc;

/// Entry point of the crate.
///
/// A context fixes the PCM layout (see [`PetalStreamConfig`]) and the sink that
/// players stream into. It holds no per-player state; players outlive it freely.
pub struct AudioContext {
    config: PetalStreamConfig,
    sink: Arc<dyn AudioSink>,
}

impl AudioContext {
    /// Create a context that plays through the default cpal output device
    pub fn new(config: PetalStreamConfig) -> Result<Self> {
        let sink = CpalSink::new(config.clone())?;
        Self::with_sink(config, sink)
    }

    /// Create a context around any sink, such as a [`MemorySink`](crate::sink::MemorySink)
    pub fn with_sink<S>(config: PetalStreamConfig, sink: S) -> Result<Self>
    where
        S: AudioSink + 'static,
    {
        config.validate()?;
        log::debug!(
            "Audio context: {} Hz, {} channels, {} bytes per sample, {:?} buffer",
            config.sample_rate,
            config.channels,
            config.bit_depth_in_bytes,
            config.latency()
        );
        Ok(Self {
            config,
            sink: Arc::new(sink),
        })
    }

    pub fn config(&self) -> &PetalStreamConfig {
        &self.config
    }

    /// Create a paused player that will stream `source` as raw PCM in this
    /// context's layout. The player owns the source from here on.
    pub fn new_player<R>(&self, source: R) -> Player
    where
        R: Read + Send + 'static,
    {
        Player::new(self.sink.clone(), Box::new(source), self.config.chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PetalStreamError;
    use crate::player::PlayState;
    use crate::sink::MemorySink;
    use std::io::Cursor;

    #[test]
    fn rejects_invalid_config() {
        let result = AudioContext::with_sink(PetalStreamConfig::new().channels(0), MemorySink::new());
        assert!(matches!(result, Err(PetalStreamError::Configuration(_))));
    }

    #[test]
    fn players_start_paused_without_a_handle() {
        let sink = MemorySink::new();
        let context = AudioContext::with_sink(PetalStreamConfig::default(), sink.clone()).unwrap();

        let player = context.new_player(Cursor::new(vec![0u8; 16]));

        assert_eq!(player.state(), PlayState::Paused);
        assert_eq!(player.volume(), 1.0);
        assert_eq!(sink.handle_count(), 0);
        assert!(player.close().is_ok());
    }
}
