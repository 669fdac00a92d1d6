//! Recording stand-ins for the synthesis backend and the audio device.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::backend::SynthesisBackend;
use crate::error::{Result, VoiceError};
use crate::playback::PlaybackChannel;

/// Deterministic audio for a phrase, so tests can tell clips apart.
pub fn samples_for(text: &str) -> Vec<f32> {
    text.bytes().map(|b| f32::from(b) / 255.0).collect()
}

// ─── Backend ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct CallLog {
    load: AtomicUsize,
    synthesize: AtomicUsize,
    unload: AtomicUsize,
    crashed: AtomicBool,
    voices: Mutex<Vec<String>>,
    texts: Mutex<Vec<String>>,
}

/// Shared view of the calls a [`StubBackend`] received.
#[derive(Clone, Default)]
pub struct BackendCalls(Arc<CallLog>);

impl BackendCalls {
    pub fn load(&self) -> usize {
        self.0.load.load(Ordering::SeqCst)
    }

    pub fn synthesize(&self) -> usize {
        self.0.synthesize.load(Ordering::SeqCst)
    }

    pub fn unload(&self) -> usize {
        self.0.unload.load(Ordering::SeqCst)
    }

    /// Kill the loaded engine: synthesis fails until the next load.
    pub fn crash(&self) {
        self.0.crashed.store(true, Ordering::SeqCst);
    }

    pub fn voices(&self) -> Vec<String> {
        self.0.voices.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.0.texts.lock().unwrap().clone()
    }
}

enum Output {
    Audio,
    Silence,
    Error,
}

pub struct StubBackend {
    calls: BackendCalls,
    load_ok: bool,
    output: Output,
    delay: Duration,
}

impl StubBackend {
    fn build(load_ok: bool, output: Output) -> (Self, BackendCalls) {
        let calls = BackendCalls::default();
        let backend = Self {
            calls: calls.clone(),
            load_ok,
            output,
            delay: Duration::ZERO,
        };
        (backend, calls)
    }

    pub fn healthy() -> (Self, BackendCalls) {
        Self::build(true, Output::Audio)
    }

    pub fn failing_load() -> (Self, BackendCalls) {
        Self::build(false, Output::Audio)
    }

    pub fn silent() -> (Self, BackendCalls) {
        Self::build(true, Output::Silence)
    }

    pub fn failing_synthesis() -> (Self, BackendCalls) {
        Self::build(true, Output::Error)
    }

    /// Make every synthesis take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl SynthesisBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&mut self) -> Result<()> {
        self.calls.0.load.fetch_add(1, Ordering::SeqCst);
        if self.load_ok {
            self.calls.0.crashed.store(false, Ordering::SeqCst);
            Ok(())
        } else {
            Err(VoiceError::BackendUnavailable("voice reference missing".into()))
        }
    }

    fn synthesize(&mut self, text: &str, voice: &str) -> Result<Vec<f32>> {
        self.calls.0.synthesize.fetch_add(1, Ordering::SeqCst);
        self.calls.0.voices.lock().unwrap().push(voice.to_string());
        self.calls.0.texts.lock().unwrap().push(text.to_string());
        std::thread::sleep(self.delay);
        if self.calls.0.crashed.load(Ordering::SeqCst) {
            return Err(VoiceError::SynthesisFailure("connection refused".into()));
        }
        match self.output {
            Output::Audio => Ok(samples_for(text)),
            Output::Silence => Ok(Vec::new()),
            Output::Error => Err(VoiceError::SynthesisFailure("model threw".into())),
        }
    }

    fn unload(&mut self) {
        self.calls.0.unload.fetch_add(1, Ordering::SeqCst);
    }

    fn is_alive(&mut self) -> bool {
        !self.calls.0.crashed.load(Ordering::SeqCst)
    }
}

// ─── Playback ──────────────────────────────────────────────────────────────

pub struct PlayRecord {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start: Instant,
    pub end: Instant,
    /// Files in the probed cache directory when playback started.
    pub cached_files: usize,
}

#[derive(Default)]
pub struct RecordingPlayback {
    plays: Mutex<Vec<PlayRecord>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stops: AtomicUsize,
    delay: Duration,
    fail_play: bool,
    fail_stop: bool,
    probe_dir: Option<PathBuf>,
}

impl RecordingPlayback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every clip "plays" for `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Count the files in `dir` each time playback starts.
    pub fn probing(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            probe_dir: Some(dir.into()),
            ..Self::default()
        })
    }

    /// An output device that is gone.
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_play: true,
            fail_stop: true,
            ..Self::default()
        })
    }

    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn with_plays<R>(&self, f: impl FnOnce(&[PlayRecord]) -> R) -> R {
        f(&self.plays.lock().unwrap())
    }
}

impl PlaybackChannel for RecordingPlayback {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if self.fail_play {
            return Err(VoiceError::PlaybackFailure("no output device".into()));
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let cached_files = self
            .probe_dir
            .as_ref()
            .map_or(0, |dir| fs::read_dir(dir).map(|d| d.count()).unwrap_or(0));
        let start = Instant::now();
        std::thread::sleep(self.delay);
        let end = Instant::now();

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.plays.lock().unwrap().push(PlayRecord {
            samples: samples.to_vec(),
            sample_rate,
            start,
            end,
            cached_files,
        });
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            Err(VoiceError::PlaybackFailure("device vanished".into()))
        } else {
            Ok(())
        }
    }
}
