//! Idle-unload supervisor: frees the resident voice model after inactivity.
//!
//! Wakes every `interval`; if the backend is loaded and has been idle for
//! longer than `idle_timeout` it is unloaded. Dropping or shutting down the
//! supervisor wakes the thread immediately and joins it.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::BackendHandle;
use crate::error::Result;

pub struct IdleSupervisor {
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IdleSupervisor {
    pub fn spawn(
        backend: Arc<BackendHandle>,
        interval: Duration,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("voxcache-idle".into())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            backend.unload_if_idle(Instant::now(), idle_timeout);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("idle supervisor stopped");
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Stop the supervisor and wait for its thread.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for IdleSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
