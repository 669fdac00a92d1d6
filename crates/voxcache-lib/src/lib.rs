//! voxcache-lib: cache-first voice engine.
//!
//! Synthesized speech cache, lazily loaded synthesis backend, background
//! pre-generation, idle unload, audio playback and the HTTP control API.
//! Depends on voxcache-core for pure types, cache keys and WAV encoding.

pub mod backend;
pub mod cache;
pub mod download;
pub mod engine;
pub mod error;
pub mod kokoro;
pub mod playback;
pub mod server;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use engine::{SpeakOutcome, VoiceEngine};
pub use error::{Result, VoiceError};

// Re-export voxcache-core for convenience
pub use voxcache_core;
