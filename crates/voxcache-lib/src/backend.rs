//! Synthesis backend seam and its loaded/unloaded state machine.
//!
//! [`SynthesisBackend`] is the collaborator interface a neural voice engine
//! implements. [`BackendHandle`] owns exactly one backend and is the only
//! path to it: loading, synthesis and unloading are serialized by a state
//! lock that is separate from the engine's playback lock, so the generation
//! worker, foreground speech and the idle supervisor can never tear a load.
//! The loaded flag is mirrored in an atomic so status reads never wait on a
//! synthesis in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, VoiceError};

/// A heavyweight speech synthesis engine.
pub trait SynthesisBackend: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Make the model resident. Called only while unloaded.
    fn load(&mut self) -> Result<()>;

    /// Produce mono samples for exactly `text`, spoken with `voice`.
    fn synthesize(&mut self, text: &str, voice: &str) -> Result<Vec<f32>>;

    /// Release the resident model. Called only while loaded.
    fn unload(&mut self);

    /// Whether a loaded model is still usable. A backend whose engine runs
    /// out of process reports `false` once that process is gone.
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// Backend for minimal mode: never loads, so only cached phrases are voiced.
pub struct DisabledBackend;

impl SynthesisBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    fn load(&mut self) -> Result<()> {
        Err(VoiceError::BackendUnavailable(
            "neural voice disabled (minimal mode)".into(),
        ))
    }

    fn synthesize(&mut self, _text: &str, _voice: &str) -> Result<Vec<f32>> {
        Err(VoiceError::BackendUnavailable(
            "neural voice disabled (minimal mode)".into(),
        ))
    }

    fn unload(&mut self) {}
}

/// Lazily loaded, idle-unloadable wrapper around one [`SynthesisBackend`].
pub struct BackendHandle {
    /// Guards every call into the backend.
    backend: Mutex<Box<dyn SynthesisBackend>>,
    /// Written only while `backend` is locked.
    loaded: AtomicBool,
    last_used: Mutex<Instant>,
    voice: String,
}

impl BackendHandle {
    pub fn new(backend: Box<dyn SynthesisBackend>, voice: impl Into<String>) -> Self {
        Self {
            backend: Mutex::new(backend),
            loaded: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
            voice: voice.into(),
        }
    }

    /// Lock-free; never waits on a load or synthesis in progress.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn SynthesisBackend>> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the backend unless it is already resident and alive. Idempotent.
    pub fn ensure_loaded(&self) -> Result<()> {
        let mut backend = self.lock();
        if self.is_loaded() {
            if backend.is_alive() {
                return Ok(());
            }
            warn!("backend: {} lost, reloading", backend.name());
            backend.unload();
            self.loaded.store(false, Ordering::SeqCst);
        }
        if self.voice.trim().is_empty() {
            return Err(VoiceError::BackendUnavailable("no voice reference configured".into()));
        }

        let started = Instant::now();
        info!("backend: loading {}", backend.name());
        backend.load()?;
        self.loaded.store(true, Ordering::SeqCst);
        info!("backend: {} loaded in {:?}", backend.name(), started.elapsed());
        Ok(())
    }

    /// Synthesize `text`. Requires a prior successful [`ensure_loaded`].
    ///
    /// A failure after which the backend reports itself dead marks it
    /// unloaded, so the next demand reloads it.
    ///
    /// [`ensure_loaded`]: Self::ensure_loaded
    pub fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        let mut backend = self.lock();
        if !self.is_loaded() {
            return Err(VoiceError::BackendUnavailable("backend not loaded".into()));
        }

        let samples = match backend.synthesize(text, &self.voice) {
            Ok(samples) => samples,
            Err(e) => {
                if !backend.is_alive() {
                    warn!("backend: {} lost during synthesis", backend.name());
                    backend.unload();
                    self.loaded.store(false, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        if samples.is_empty() {
            return Err(VoiceError::SynthesisFailure(format!(
                "{} returned no audio",
                backend.name()
            )));
        }
        debug!("backend: synthesized {} samples", samples.len());
        Ok(samples)
    }

    /// Release the resident model. Returns whether a transition happened.
    pub fn unload(&self) -> bool {
        let mut backend = self.lock();
        if !self.is_loaded() {
            return false;
        }
        info!("backend: unloading {}", backend.name());
        backend.unload();
        self.loaded.store(false, Ordering::SeqCst);
        true
    }

    /// Record activity; postpones the idle unload.
    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Unload if loaded and idle for longer than `threshold`.
    pub fn unload_if_idle(&self, now: Instant, threshold: Duration) -> bool {
        let mut backend = self.lock();
        if !self.is_loaded() {
            return false;
        }
        let idle = self.idle_for(now);
        if idle <= threshold {
            return false;
        }
        info!(
            "backend: idle for {}s, unloading {}",
            idle.as_secs(),
            backend.name()
        );
        backend.unload();
        self.loaded.store(false, Ordering::SeqCst);
        true
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        if self.unload() {
            debug!("backend: unloaded on drop");
        }
    }
}
