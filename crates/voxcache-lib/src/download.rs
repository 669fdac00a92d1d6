//! Resumable model downloader with progress reporting via callback.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use voxcache_core::types::{DownloadProgress, ModelInfo, KOKORO_MODEL, KOKORO_VOICES};

use crate::error::{Result, VoiceError};

fn unavailable(context: &str, e: impl std::fmt::Display) -> VoiceError {
    VoiceError::BackendUnavailable(format!("{context}: {e}"))
}

pub fn model_path(models_dir: &Path, model: &ModelInfo) -> PathBuf {
    models_dir.join(model.filename)
}

fn partial_path(models_dir: &Path, model: &ModelInfo) -> PathBuf {
    models_dir.join(format!("{}.partial", model.filename))
}

/// Total size from a `Content-Range: bytes a-b/total` header value.
fn range_total(content_range: &str) -> Option<u64> {
    content_range.rsplit('/').next()?.trim().parse().ok()
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (done as f32 / total as f32 * 100.0).min(100.0)
}

fn complete(model: &ModelInfo, total: u64) -> DownloadProgress {
    DownloadProgress {
        model: model.name.to_string(),
        percent: 100.0,
        bytes_done: total,
        bytes_total: total,
        status: "complete".to_string(),
    }
}

/// Download `model` into `models_dir`, resuming a previous `.partial` file.
pub async fn download_model(
    client: &reqwest::Client,
    models_dir: &Path,
    model: &ModelInfo,
    on_progress: impl Fn(DownloadProgress),
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(models_dir)
        .await
        .map_err(|e| unavailable("failed to create models dir", e))?;

    let dest = model_path(models_dir, model);
    if dest.is_file() {
        on_progress(complete(model, model.expected_size));
        return Ok(dest);
    }

    let partial = partial_path(models_dir, model);
    let existing_size = tokio::fs::metadata(&partial)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let mut req = client.get(model.url);
    if existing_size > 0 {
        req = req.header(reqwest::header::RANGE, format!("bytes={existing_size}-"));
    }

    let resp = req
        .send()
        .await
        .map_err(|e| unavailable("download request failed", e))?;

    let resumed = resp.status() == reqwest::StatusCode::PARTIAL_CONTENT;
    if !resp.status().is_success() {
        return Err(VoiceError::BackendUnavailable(format!(
            "download of {} failed with status {}",
            model.name,
            resp.status()
        )));
    }

    let total_size = if resumed {
        resp.headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(range_total)
            .unwrap_or(model.expected_size)
    } else {
        resp.content_length().unwrap_or(model.expected_size)
    };

    // A server that ignored the range sends the whole file again
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(resumed)
        .truncate(!resumed)
        .open(&partial)
        .await
        .map_err(|e| unavailable("failed to open partial file", e))?;

    let mut bytes_done = if resumed { existing_size } else { 0 };
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| unavailable("download stream error", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| unavailable("failed to write chunk", e))?;

        bytes_done += chunk.len() as u64;
        on_progress(DownloadProgress {
            model: model.name.to_string(),
            percent: percent(bytes_done, total_size),
            bytes_done,
            bytes_total: total_size,
            status: "downloading".to_string(),
        });
    }

    file.flush()
        .await
        .map_err(|e| unavailable("flush failed", e))?;
    drop(file);

    tokio::fs::rename(&partial, &dest)
        .await
        .map_err(|e| unavailable("failed to finalize download", e))?;

    on_progress(complete(model, total_size));
    Ok(dest)
}

/// Ensure the Kokoro model and voice pack are present. Returns their paths.
pub async fn ensure_voice_models(
    client: &reqwest::Client,
    models_dir: &Path,
    on_progress: impl Fn(DownloadProgress),
) -> Result<(PathBuf, PathBuf)> {
    let model = download_model(client, models_dir, &KOKORO_MODEL, &on_progress).await?;
    let voices = download_model(client, models_dir, &KOKORO_VOICES, &on_progress).await?;
    Ok((model, voices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            model_path(dir.path(), &KOKORO_MODEL),
            dir.path().join("kokoro-v1.0.onnx")
        );
        assert_eq!(
            partial_path(dir.path(), &KOKORO_VOICES),
            dir.path().join("voices-v1.0.bin.partial")
        );
    }

    #[test]
    fn parses_content_range_total() {
        assert_eq!(range_total("bytes 100-199/5200000"), Some(5_200_000));
        assert_eq!(range_total("bytes 0-9/*"), None);
        assert_eq!(range_total("garbage"), None);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
        assert_eq!(percent(10, 0), 0.0);
    }

    #[tokio::test]
    async fn existing_model_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(model_path(dir.path(), &KOKORO_MODEL), b"onnx").unwrap();
        std::fs::write(model_path(dir.path(), &KOKORO_VOICES), b"voices").unwrap();

        let reports = std::sync::Mutex::new(Vec::new());
        let client = reqwest::Client::new();
        let (model, voices) = ensure_voice_models(&client, dir.path(), |p| {
            reports.lock().unwrap().push(p.status)
        })
        .await
        .unwrap();

        assert_eq!(model, model_path(dir.path(), &KOKORO_MODEL));
        assert_eq!(voices, model_path(dir.path(), &KOKORO_VOICES));
        assert_eq!(*reports.lock().unwrap(), vec!["complete", "complete"]);
    }
}
