//! Phrase cache: in-memory index over a directory of float WAV clips.
//!
//! Every clip is stored as `<key>.wav` where the key is derived from the
//! normalized phrase. The whole directory is loaded at open; afterwards the
//! store is append-only. Lookups are exact matches on the normalized phrase.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use voxcache_core::text::{CacheKey, key_for};
use voxcache_core::wav::{decode_f32_wav, duration_secs, encode_f32_wav};

use crate::error::{Result, VoiceError};

const CLIP_EXTENSION: &str = "wav";

/// Distinguishes temp files of concurrent writers of the same key.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct CacheStore {
    dir: PathBuf,
    sample_rate: u32,
    entries: RwLock<HashMap<CacheKey, Arc<[f32]>>>,
}

impl CacheStore {
    /// Open (creating if needed) a cache directory and load every clip in it.
    ///
    /// Unreadable clips, clips recorded at another sample rate and files
    /// whose stem is not a key are skipped.
    pub fn open(dir: impl Into<PathBuf>, sample_rate: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut entries = HashMap::new();
        let mut total_samples = 0usize;

        for entry in fs::read_dir(&dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("cache: unreadable directory entry: {e}");
                    continue;
                }
            };
            if path.extension() != Some(OsStr::new(CLIP_EXTENSION)) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(OsStr::to_str)
                .and_then(CacheKey::parse)
            else {
                debug!("cache: ignoring {}", path.display());
                continue;
            };

            match load_clip(&path, sample_rate) {
                Ok(samples) => {
                    total_samples += samples.len();
                    entries.insert(key, Arc::from(samples));
                }
                Err(reason) => warn!("cache: skipping {}: {reason}", path.display()),
            }
        }

        if entries.is_empty() {
            info!("cache: no cached phrases in {}", dir.display());
        } else {
            info!(
                "cache: loaded {} cached phrases ({:.1} minutes of audio)",
                entries.len(),
                duration_secs(total_samples, sample_rate) / 60.0
            );
        }

        Ok(Self {
            dir,
            sample_rate,
            entries: RwLock::new(entries),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Cache key for `text`.
    pub fn key_for(&self, text: &str) -> CacheKey {
        key_for(text)
    }

    /// Exact-match lookup on the normalized phrase.
    pub fn get(&self, text: &str) -> Option<Arc<[f32]>> {
        let key = key_for(text);
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    pub fn contains(&self, text: &str) -> bool {
        let key = key_for(text);
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&key)
    }

    /// Store a clip. The in-memory entry is visible before the file is
    /// written, so a persist failure still leaves the clip usable for the
    /// rest of the process.
    pub fn put(&self, text: &str, samples: Vec<f32>) -> Result<()> {
        let key = key_for(text);
        let clip: Arc<[f32]> = Arc::from(samples);

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), clip.clone());

        self.persist(&key, &clip)
            .map_err(|source| VoiceError::CachePersistFailure { key: key.clone(), source })?;
        debug!("cache: stored {key} ({} samples)", clip.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total playback length of every cached clip, in seconds.
    pub fn total_duration_secs(&self) -> f64 {
        let samples: usize = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|clip| clip.len())
            .sum();
        duration_secs(samples, self.sample_rate)
    }

    fn clip_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.{CLIP_EXTENSION}"))
    }

    /// Write to a temp file and rename so readers never see a partial clip.
    fn persist(&self, key: &CacheKey, samples: &[f32]) -> std::io::Result<()> {
        let dest = self.clip_path(key);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let partial = self.dir.join(format!(
            "{key}.{CLIP_EXTENSION}.{}-{seq}.tmp",
            std::process::id()
        ));

        let result = fs::write(&partial, encode_f32_wav(samples, self.sample_rate))
            .and_then(|()| fs::rename(&partial, &dest));
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

fn load_clip(path: &Path, sample_rate: u32) -> std::result::Result<Vec<f32>, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let (rate, samples) = decode_f32_wav(&bytes).map_err(str::to_string)?;
    if rate != sample_rate {
        return Err(format!("recorded at {rate} Hz, engine runs at {sample_rate} Hz"));
    }
    Ok(samples)
}
