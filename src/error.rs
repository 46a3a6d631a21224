//! Error types for PetalStream

use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by contexts, sinks and players.
///
/// The type is `Clone` because a player keeps the first fatal error and hands a
/// copy to every caller of [`Player::close`](crate::Player::close).
#[derive(Error, Debug, Clone)]
pub enum PetalStreamError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<std::io::Error> for PetalStreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PetalStreamError>;
