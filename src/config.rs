//! Configuration for PetalStream

use crate::error::{PetalStreamError, Result};
use std::time::Duration;

/// PCM layout and buffering parameters shared by a context's sinks and players.
#[derive(Debug, Clone, PartialEq)]
pub struct PetalStreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// 1 = unsigned 8-bit, 2 = signed 16-bit little-endian
    pub bit_depth_in_bytes: u16,
    /// Queued bytes at which a sink handle stops reporting itself writable
    pub buffer_size: usize,
    /// Bytes pulled from the source per streaming-task iteration
    pub chunk_size: usize,
}

impl Default for PetalStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bit_depth_in_bytes: 2,
            buffer_size: 8192,
            chunk_size: 4096,
        }
    }
}

impl PetalStreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn bit_depth_in_bytes(mut self, bytes: u16) -> Self {
        self.bit_depth_in_bytes = bytes;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bit_depth_in_bytes as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Playback time represented by a full sink buffer
    pub fn latency(&self) -> Duration {
        let bytes_per_second = self.bytes_per_second();
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.buffer_size as f64 / bytes_per_second as f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PetalStreamError::Configuration(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.channels == 0 {
            return Err(PetalStreamError::Configuration(
                "channel count must be non-zero".into(),
            ));
        }
        if !matches!(self.bit_depth_in_bytes, 1 | 2) {
            return Err(PetalStreamError::Configuration(format!(
                "unsupported bit depth: {} bytes per sample",
                self.bit_depth_in_bytes
            )));
        }
        if self.chunk_size == 0 {
            return Err(PetalStreamError::Configuration(
                "chunk size must be non-zero".into(),
            ));
        }
        if self.buffer_size == 0 || self.buffer_size % self.bytes_per_frame() != 0 {
            return Err(PetalStreamError::Configuration(format!(
                "buffer size {} must be a non-zero multiple of the {}-byte frame",
                self.buffer_size,
                self.bytes_per_frame()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PetalStreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bytes_per_frame(), 4);
        assert_eq!(config.bytes_per_second(), 192_000);
    }

    #[test]
    fn latency_follows_buffer_size() {
        let config = PetalStreamConfig::new()
            .sample_rate(44100)
            .channels(1)
            .bit_depth_in_bytes(2)
            .buffer_size(88200);
        assert_eq!(config.latency(), Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(PetalStreamConfig::new().sample_rate(0).validate().is_err());
        assert!(PetalStreamConfig::new().channels(0).validate().is_err());
        assert!(PetalStreamConfig::new().bit_depth_in_bytes(3).validate().is_err());
        assert!(PetalStreamConfig::new().chunk_size(0).validate().is_err());
        // 2 channels * 2 bytes: 8190 is not frame aligned
        let err = PetalStreamConfig::new().buffer_size(8190).validate();
        assert!(matches!(err, Err(PetalStreamError::Configuration(_))));
    }
}
