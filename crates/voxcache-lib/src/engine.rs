//! Voice engine: cache-first speech with lazy synthesis.
//!
//! ```text
//! speak("text") ─ speak lock ─┬─ cache hit  → play
//!                             └─ cache miss → ensure_loaded → synthesize → play → cache.put
//!
//! queue_for_generation("text") → [queue] → generation worker → synthesize → cache.put
//! idle supervisor (every tick) → unload backend after idle_timeout
//! ```
//!
//! One speak runs at a time: the speak lock covers lookup, synthesis,
//! playback and the cache write, so the single output device and the single
//! resident model are never used concurrently by two speakers. The worker
//! skips that lock and relies on the backend's own state lock.
//! `is_speaking` and `stop` only touch an atomic flag and the output device,
//! so they work while another thread holds the speak lock.
//!
//! Nothing here fails loudly: a missing backend, a synthesis error or a
//! broken output device all end as "no sound", a log line and a
//! [`SpeakOutcome::Failed`] value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use voxcache_core::text::is_speakable;
use voxcache_core::types::{AudioSource, EngineStatus, PregenerateReport, VoiceConfig};

use crate::backend::{BackendHandle, SynthesisBackend};
use crate::cache::CacheStore;
use crate::error::{Result, VoiceError};
use crate::playback::PlaybackChannel;
use crate::supervisor::IdleSupervisor;
use crate::worker::{process_task, GenerationQueue, GenerationWorker, TaskOutcome};

/// What a call to [`VoiceEngine::speak`] did.
#[derive(Debug)]
pub enum SpeakOutcome {
    /// Audio was played.
    Played(AudioSource),
    /// Handed to a background thread (non-blocking speak).
    Dispatched,
    /// Nothing speakable in the text.
    Skipped,
    /// No audio was produced; the cause was logged.
    Failed(VoiceError),
}

impl SpeakOutcome {
    pub fn is_played(&self) -> bool {
        matches!(self, Self::Played(_))
    }
}

/// State shared by the engine handle and detached speak threads.
struct Shared {
    cache: Arc<CacheStore>,
    backend: Arc<BackendHandle>,
    playback: Arc<dyn PlaybackChannel>,
    speak_lock: Mutex<()>,
    speaking: AtomicBool,
    queue: GenerationQueue,
}

struct Workers {
    generation: GenerationWorker,
    supervisor: IdleSupervisor,
}

/// The voice engine. Build one at startup and share it by `Arc`.
pub struct VoiceEngine {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl VoiceEngine {
    /// Open the cache, start the generation worker and the idle supervisor.
    ///
    /// On a cold cache the first `bootstrap_limit` bootstrap phrases are
    /// queued for background generation.
    pub fn new(
        config: VoiceConfig,
        backend: Box<dyn SynthesisBackend>,
        voice: impl Into<String>,
        playback: Arc<dyn PlaybackChannel>,
    ) -> Result<Self> {
        let cache = Arc::new(CacheStore::open(&config.cache_dir, config.sample_rate)?);
        let backend = Arc::new(BackendHandle::new(backend, voice));

        let (queue, generation) =
            GenerationWorker::spawn(cache.clone(), backend.clone(), config.queue_poll)?;
        let supervisor =
            IdleSupervisor::spawn(backend.clone(), config.monitor_interval, config.idle_timeout)?;

        if cache.is_empty() {
            let phrases: Vec<&String> =
                config.bootstrap_phrases.iter().take(config.bootstrap_limit).collect();
            info!("cold cache: queuing {} phrases for background generation", phrases.len());
            for phrase in phrases {
                queue.push(phrase.as_str());
            }
        }

        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                backend,
                playback,
                speak_lock: Mutex::new(()),
                speaking: AtomicBool::new(false),
                queue,
            }),
            workers: Mutex::new(Some(Workers {
                generation,
                supervisor,
            })),
        })
    }

    /// Speak `text`: from the cache when possible, otherwise synthesize,
    /// play and cache it.
    ///
    /// With `blocking = false` the work runs on a new thread and
    /// [`SpeakOutcome::Dispatched`] is returned immediately.
    pub fn speak(&self, text: &str, blocking: bool) -> SpeakOutcome {
        let text = text.trim();
        if !is_speakable(text) {
            return SpeakOutcome::Skipped;
        }

        if blocking {
            return self.shared.speak_sync(text);
        }

        let shared = self.shared.clone();
        let owned = text.to_string();
        match std::thread::Builder::new()
            .name("voxcache-speak".into())
            .spawn(move || {
                shared.speak_sync(&owned);
            }) {
            Ok(_) => SpeakOutcome::Dispatched,
            Err(e) => {
                error!("speak: failed to spawn thread: {e}");
                SpeakOutcome::Failed(VoiceError::Io(e))
            }
        }
    }

    /// Queue `text` for background generation unless it is already cached.
    pub fn queue_for_generation(&self, text: &str) {
        let text = text.trim();
        if !is_speakable(text) || self.shared.cache.contains(text) {
            return;
        }
        if !self.shared.queue.push(text) {
            warn!("generation worker stopped; dropping {text:.30}");
        }
    }

    /// Whether a speak is currently synthesizing or playing.
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    /// Halt playback. The speaking flag is cleared even if the device fails.
    pub fn stop(&self) {
        if let Err(e) = self.shared.playback.stop() {
            warn!("stop: {e}");
        }
        self.shared.speaking.store(false, Ordering::SeqCst);
    }

    /// Synchronously generate every uncached phrase in `phrases`.
    ///
    /// `on_progress(index, total, phrase, outcome)` is called after each phrase.
    pub fn pregenerate<S: AsRef<str>>(
        &self,
        phrases: &[S],
        mut on_progress: impl FnMut(usize, usize, &str, &TaskOutcome),
    ) -> Result<PregenerateReport> {
        self.shared.backend.ensure_loaded()?;

        let total = phrases.len();
        let mut report = PregenerateReport::default();
        for (i, phrase) in phrases.iter().enumerate() {
            let phrase = phrase.as_ref();
            let outcome = process_task(&self.shared.cache, &self.shared.backend, phrase);
            match outcome {
                TaskOutcome::AlreadyCached => report.already_cached += 1,
                TaskOutcome::Cached => report.generated += 1,
                TaskOutcome::Failed(_) => report.failed += 1,
            }
            on_progress(i + 1, total, phrase, &outcome);
        }
        info!(
            "pregenerate: {} generated, {} already cached, {} failed",
            report.generated, report.already_cached, report.failed
        );
        Ok(report)
    }

    pub fn status(&self) -> EngineStatus {
        let shared = &self.shared;
        EngineStatus {
            speaking: self.is_speaking(),
            backend_loaded: shared.backend.is_loaded(),
            cached_phrases: shared.cache.len(),
            cached_audio_secs: shared.cache.total_duration_secs(),
            pending_generation: shared.queue.pending(),
            idle_secs: shared.backend.idle_for(Instant::now()).as_secs(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    /// Stop the worker and the supervisor and unload the backend.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut workers) = workers {
            workers.supervisor.shutdown();
            workers.generation.shutdown();
            self.shared.backend.unload();
            info!("voice engine shut down");
        }
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn speak_sync(&self, text: &str) -> SpeakOutcome {
        self.backend.touch();
        let _lock = self.speak_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _speaking = SpeakingGuard::set(&self.speaking);

        if let Some(clip) = self.cache.get(text) {
            debug!("speak: cache hit: {text:.30}");
            return match self.playback.play(&clip, self.cache.sample_rate()) {
                Ok(()) => SpeakOutcome::Played(AudioSource::Cached),
                Err(e) => {
                    warn!("speak: {e}");
                    SpeakOutcome::Failed(e)
                }
            };
        }

        if let Err(e) = self.backend.ensure_loaded() {
            warn!("speak: {e}; text only: {text}");
            return SpeakOutcome::Failed(e);
        }

        let samples = match self.backend.synthesize(text) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("speak: could not generate audio for {text:.30}: {e}");
                return SpeakOutcome::Failed(e);
            }
        };

        // The clip is complete before playback starts, so it is cached even
        // if playback is interrupted.
        let played = self.playback.play(&samples, self.cache.sample_rate());
        if let Err(e) = self.cache.put(text, samples) {
            warn!("speak: {e}");
        }

        match played {
            Ok(()) => SpeakOutcome::Played(AudioSource::Synthesized),
            Err(e) => {
                warn!("speak: {e}");
                SpeakOutcome::Failed(e)
            }
        }
    }
}

/// Sets the speaking flag for the lifetime of the guard.
struct SpeakingGuard<'a>(&'a AtomicBool);

impl<'a> SpeakingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
