//! Audio output: the playback channel seam and its rodio implementation.
//!
//! ```text
//! play(samples) → [cmd_tx] → playback thread: sink.append(ClipSource)
//!                                   ↓ clip exhausted / dropped
//!      ← [done_rx] ←────────────────┘
//! ```
//!
//! rodio's `OutputStream` is `!Send`, so the stream and sink live on a
//! dedicated OS thread. Each clip carries a completion sender: it fires when
//! the sink drains the clip, and disconnects when the clip is dropped early
//! (stop). `play` blocks on that signal, bounded by the clip duration plus a
//! grace period.

use std::sync::mpsc;
use std::time::Duration;

use rodio::{OutputStream, Sink, Source};
use tracing::{debug, error, info};

use voxcache_core::wav::duration_secs;

use crate::error::{Result, VoiceError};

/// Extra time allowed beyond the clip length before `play` gives up.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);

/// An audio output device.
pub trait PlaybackChannel: Send + Sync {
    /// Play mono samples, returning once the clip finished or was stopped.
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()>;

    /// Halt whatever is playing. Best effort.
    fn stop(&self) -> Result<()>;
}

/// Discards audio. For headless use such as cache pre-generation.
pub struct NullPlayback;

impl PlaybackChannel for NullPlayback {
    fn play(&self, _samples: &[f32], _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

enum PlayCmd {
    Play(ClipSource),
    Stop,
}

/// Default output device via rodio.
pub struct RodioPlayback {
    cmd_tx: mpsc::Sender<PlayCmd>,
}

impl RodioPlayback {
    /// Spawn the playback thread and wait until the output device is open.
    pub fn new() -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayCmd>();
        let (ready_tx, ready_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("voxcache-playback".into())
            .spawn(move || playback_thread(cmd_rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { cmd_tx }),
            Ok(Err(reason)) => Err(VoiceError::PlaybackFailure(reason)),
            Err(_) => Err(VoiceError::PlaybackFailure(
                "playback thread exited during startup".into(),
            )),
        }
    }

    fn send(&self, cmd: PlayCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| VoiceError::PlaybackFailure("playback thread is not running".into()))
    }
}

impl PlaybackChannel for RodioPlayback {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let (done_tx, done_rx) = mpsc::channel();
        let clip = ClipSource::new(samples.to_vec(), sample_rate, done_tx);
        let timeout =
            Duration::from_secs_f64(duration_secs(samples.len(), sample_rate)) + PLAYBACK_GRACE;

        self.send(PlayCmd::Play(clip))?;

        match done_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!("playback: clip interrupted");
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(VoiceError::PlaybackFailure(format!(
                "clip did not finish within {timeout:?}"
            ))),
        }
    }

    fn stop(&self) -> Result<()> {
        self.send(PlayCmd::Stop)
    }
}

// ─── Playback OS thread ───────────────────────────────────────────────────

fn playback_thread(
    cmd_rx: mpsc::Receiver<PlayCmd>,
    ready_tx: mpsc::Sender<std::result::Result<(), String>>,
) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to open audio output: {e}")));
            return;
        }
    };

    let mut sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("failed to create sink: {e}")));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    info!("playback: audio output ready");

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            PlayCmd::Play(clip) => {
                debug!("playback: clip appended to sink");
                sink.append(clip);
            }
            PlayCmd::Stop => {
                sink.stop();
                sink = match Sink::try_new(&stream_handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("playback: failed to recreate sink: {e}");
                        return;
                    }
                };
            }
        }
    }
    sink.stop();
}

// ─── Clip source ──────────────────────────────────────────────────────────

/// A fully buffered mono clip that reports when the sink has drained it.
struct ClipSource {
    samples: std::vec::IntoIter<f32>,
    sample_rate: u32,
    done: Option<mpsc::Sender<()>>,
}

impl ClipSource {
    fn new(samples: Vec<f32>, sample_rate: u32, done: mpsc::Sender<()>) -> Self {
        Self {
            samples: samples.into_iter(),
            sample_rate,
            done: Some(done),
        }
    }
}

impl Iterator for ClipSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.samples.next();
        if sample.is_none() {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
        sample
    }
}

impl Source for ClipSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.samples.len())
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(duration_secs(
            self.samples.len(),
            self.sample_rate,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_yields_samples_then_signals_done() {
        let (tx, rx) = mpsc::channel();
        let mut clip = ClipSource::new(vec![0.1, 0.2, 0.3], 24_000, tx);

        let samples: Vec<f32> = clip.by_ref().collect();
        assert_eq!(samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(rx.try_recv(), Ok(()));
        // Signal fires once
        assert_eq!(clip.next(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_clip_disconnects() {
        let (tx, rx) = mpsc::channel();
        let mut clip = ClipSource::new(vec![0.5; 10], 24_000, tx);
        assert_eq!(clip.next(), Some(0.5));
        drop(clip);
        assert_eq!(rx.recv(), Err(mpsc::RecvError));
    }

    #[test]
    fn null_playback_accepts_everything() {
        assert!(NullPlayback.play(&[0.1, 0.2], 24_000).is_ok());
        assert!(NullPlayback.stop().is_ok());
    }

    #[test]
    fn clip_reports_format() {
        let (tx, _rx) = mpsc::channel();
        let clip = ClipSource::new(vec![0.0; 12_000], 24_000, tx);
        assert_eq!(clip.channels(), 1);
        assert_eq!(clip.sample_rate(), 24_000);
        assert_eq!(clip.current_frame_len(), Some(12_000));
        assert_eq!(clip.total_duration(), Some(Duration::from_millis(500)));
    }
}
