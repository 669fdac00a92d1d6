//! Background pre-generation: a queue of phrases and the single worker that
//! synthesizes and caches them.
//!
//! Producers never block. The worker pops with a short timeout so it can
//! notice shutdown; it exits when shut down or when every producer is gone.
//! A task whose phrase is already cached is skipped, so duplicates in the
//! queue are harmless. Failed tasks are logged and dropped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::BackendHandle;
use crate::cache::CacheStore;
use crate::error::{Result, VoiceError};

struct GenerationTask {
    text: String,
}

/// Producer side of the generation queue. Cheap to clone.
#[derive(Clone)]
pub struct GenerationQueue {
    tx: mpsc::Sender<GenerationTask>,
    pending: Arc<AtomicUsize>,
}

impl GenerationQueue {
    /// Enqueue a phrase. Returns `false` if the worker has stopped.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = self.tx.send(GenerationTask { text: text.into() }).is_ok();
        if !sent {
            // Saturating: the stopped worker may already have zeroed the count
            let _ = self
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        sent
    }

    /// Tasks queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// What the worker did with one task.
#[derive(Debug)]
pub enum TaskOutcome {
    AlreadyCached,
    Cached,
    Failed(VoiceError),
}

/// Handle to the running worker thread.
pub struct GenerationWorker {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GenerationWorker {
    /// Spawn the worker. Returns the producer handle and the worker handle.
    pub fn spawn(
        cache: Arc<CacheStore>,
        backend: Arc<BackendHandle>,
        poll: Duration,
    ) -> Result<(GenerationQueue, Self)> {
        let (tx, rx) = mpsc::channel::<GenerationTask>();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_pending = pending.clone();
        let worker_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("voxcache-generate".into())
            .spawn(move || {
                while !worker_shutdown.load(Ordering::SeqCst) {
                    let task = match rx.recv_timeout(poll) {
                        Ok(task) => task,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    worker_pending.fetch_sub(1, Ordering::SeqCst);
                    process_task(&cache, &backend, &task.text);
                }
                // Tasks still queued will never run
                drop(rx);
                worker_pending.store(0, Ordering::SeqCst);
                debug!("generation worker stopped");
            })?;

        let worker = Self {
            shutdown,
            thread: Some(thread),
        };
        Ok((GenerationQueue { tx, pending }, worker))
    }

    /// Ask the worker to stop and wait for it. A synthesis in progress is
    /// allowed to finish.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Synthesize and cache one phrase unless it is already cached.
pub fn process_task(cache: &CacheStore, backend: &BackendHandle, text: &str) -> TaskOutcome {
    backend.touch();
    if cache.contains(text) {
        debug!("background: already cached: {text:.30}");
        return TaskOutcome::AlreadyCached;
    }

    if let Err(e) = backend.ensure_loaded() {
        warn!("background: cannot generate {text:.30}: {e}");
        return TaskOutcome::Failed(e);
    }

    debug!("background: generating: {text:.30}");
    let samples = match backend.synthesize(text) {
        Ok(samples) => samples,
        Err(e) => {
            warn!("background: generation failed for {text:.30}: {e}");
            return TaskOutcome::Failed(e);
        }
    };

    if let Err(e) = cache.put(text, samples) {
        warn!("background: {e}");
    }
    info!("background: cached: {text:.30}");
    TaskOutcome::Cached
}
