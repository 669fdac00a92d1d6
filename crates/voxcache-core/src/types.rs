//! Shared types for the voxcache voice engine.
//!
//! Kept here so consumers (the CLI, an assistant command loop) can depend on
//! configuration and status types without pulling in rodio or tokio.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wav::SAMPLE_RATE;

// ─── Engine configuration ──────────────────────────────────────────────────

/// Backend is unloaded after this much synthesis inactivity.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Idle supervisor cadence.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);
/// Generation worker pop timeout; bounds shutdown latency.
pub const DEFAULT_QUEUE_POLL: Duration = Duration::from_secs(1);
/// Phrases queued on a cold cache.
pub const DEFAULT_BOOTSTRAP_LIMIT: usize = 20;

/// Voice engine configuration.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub cache_dir: PathBuf,
    pub sample_rate: u32,
    pub idle_timeout: Duration,
    pub monitor_interval: Duration,
    pub queue_poll: Duration,
    /// Phrases pre-warmed when the cache starts empty.
    pub bootstrap_phrases: Vec<String>,
    pub bootstrap_limit: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("voxcache_cache"),
            sample_rate: SAMPLE_RATE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            queue_poll: DEFAULT_QUEUE_POLL,
            bootstrap_phrases: COMMON_PHRASES.iter().map(|p| p.to_string()).collect(),
            bootstrap_limit: DEFAULT_BOOTSTRAP_LIMIT,
        }
    }
}

/// Kokoro synthesis backend configuration.
#[derive(Debug, Clone)]
pub struct KokoroConfig {
    pub url: String,
    pub speed: f32,
    /// When set, a missing server is started as a sidecar using model files
    /// downloaded into this directory. When unset the server must already run.
    pub models_dir: Option<PathBuf>,
    /// Sidecar startup health-check deadline.
    pub startup_timeout: Duration,
}

impl Default for KokoroConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".into(),
            speed: 1.08,
            models_dir: None,
            startup_timeout: Duration::from_secs(60),
        }
    }
}

// ─── Status ────────────────────────────────────────────────────────────────

/// Engine status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub speaking: bool,
    pub backend_loaded: bool,
    pub cached_phrases: usize,
    pub cached_audio_secs: f64,
    pub pending_generation: usize,
    pub idle_secs: u64,
}

/// How a phrase was voiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSource {
    /// Played straight from the cache.
    Cached,
    /// Synthesized on demand, then cached.
    Synthesized,
}

/// Result of a pre-generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PregenerateReport {
    pub generated: usize,
    pub already_cached: usize,
    pub failed: usize,
}

// ─── Download types ────────────────────────────────────────────────────────

/// Model file definition.
pub struct ModelInfo {
    pub name: &'static str,
    pub filename: &'static str,
    pub url: &'static str,
    pub expected_size: u64,
}

pub const KOKORO_MODEL: ModelInfo = ModelInfo {
    name: "kokoro",
    filename: "kokoro-v1.0.onnx",
    url: "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0/kokoro-v1.0.onnx",
    expected_size: 326_000_000,
};

pub const KOKORO_VOICES: ModelInfo = ModelInfo {
    name: "kokoro-voices",
    filename: "voices-v1.0.bin",
    url: "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0/voices-v1.0.bin",
    expected_size: 5_200_000,
};

/// Download progress payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub model: String,
    pub percent: f32,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub status: String, // "downloading" | "complete"
}

// ─── Phrases ───────────────────────────────────────────────────────────────

/// Assistant phrases worth having in the cache before anyone asks.
pub const COMMON_PHRASES: &[&str] = &[
    // Greetings
    "Yes sir?",
    "At your service.",
    "How may I assist you?",
    "I'm listening, sir.",
    "Good morning, sir.",
    "Good evening, sir.",
    // Acknowledgments
    "Right away, sir.",
    "As you wish.",
    "Consider it done.",
    "Executing now.",
    "On it, sir.",
    "Certainly.",
    "Very good, sir.",
    "Understood.",
    // Actions
    "Opening Chrome.",
    "Opening YouTube.",
    "Opening Spotify.",
    "Opening Notepad.",
    "Searching now.",
    "Screenshot taken.",
    "Playing music.",
    "Stopping playback.",
    // Status
    "All systems operational.",
    "Processing your request.",
    "Analysis complete.",
    "Task completed.",
    "Running diagnostics.",
    // Errors
    "I didn't catch that.",
    "I didn't hear anything.",
    "I couldn't complete that request.",
    "Something went wrong.",
    "Please try again.",
    // Time/Date
    "Let me check the time.",
    "Here's the current date.",
    // Goodbye
    "Standing by, sir.",
    "I'll be here when you need me.",
    "Going quiet. Say my name when you need me.",
    // Personality
    "How may I be of assistance?",
    "Shall I run a diagnostic?",
    "All systems are functioning normally.",
];
