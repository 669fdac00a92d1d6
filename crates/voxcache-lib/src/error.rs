//! Error types for the voice engine.
//!
//! Nothing here escapes `VoiceEngine::speak` as a fault: every variant is
//! logged and surfaced as [`crate::engine::SpeakOutcome::Failed`].

use thiserror::Error;

use voxcache_core::text::CacheKey;

/// Result type alias for voice engine operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// Synthesis engine could not be loaded (missing server, model, voice).
    #[error("voice backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Engine loaded but produced no usable audio.
    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Output device error.
    #[error("playback failed: {0}")]
    PlaybackFailure(String),

    /// Cache entry could not be written; the in-memory copy is still valid.
    #[error("failed to persist cache entry {key}: {source}")]
    CachePersistFailure {
        key: CacheKey,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
