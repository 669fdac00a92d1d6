//! Kokoro synthesis backend: an OpenAI-compatible Kokoro server, optionally
//! run as a sidecar process this backend owns.
//!
//! ```text
//! load()       → server reachable? reuse it
//!                 └─ else: download model + voices → spawn koko → wait for health
//! synthesize() → POST {url}/v1/audio/speech (pcm) → i16 LE stream → f32 samples
//! unload()     → kill the owned sidecar (an external server is left alone)
//! ```
//!
//! The backend is driven from plain OS threads, so it carries a private
//! single-worker tokio runtime and `block_on`s its HTTP and process work.
//! Never call it from inside another runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::Child;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use voxcache_core::types::KokoroConfig;
use voxcache_core::wav::pcm16_le_to_f32;

use crate::backend::SynthesisBackend;
use crate::download;
use crate::error::{Result, VoiceError};

const KOKORO_SIDECAR: &str = "koko";
const REACHABLE_TIMEOUT: Duration = Duration::from_secs(1);
const HEALTH_POLL: Duration = Duration::from_millis(500);

pub struct KokoroBackend {
    config: KokoroConfig,
    runtime: Arc<Runtime>,
    client: reqwest::Client,
    sidecar: Option<Child>,
}

impl KokoroBackend {
    pub fn new(config: KokoroConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("voxcache-kokoro")
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            runtime: Arc::new(runtime),
            client: reqwest::Client::new(),
            sidecar: None,
        })
    }

    fn speech_url(&self) -> String {
        format!("{}/v1/audio/speech", self.config.url.trim_end_matches('/'))
    }

    fn health_url(&self) -> String {
        format!("{}/", self.config.url.trim_end_matches('/'))
    }

    async fn is_reachable(&self) -> bool {
        self.client
            .get(self.health_url())
            .timeout(REACHABLE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }

    /// Whether the sidecar we spawned is still alive. Reaps it if not.
    fn sidecar_running(&mut self) -> bool {
        match self.sidecar.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(_) => {
                self.sidecar = None;
                false
            }
            None => false,
        }
    }

    async fn load_async(&mut self) -> Result<()> {
        if self.is_reachable().await {
            info!("kokoro: reusing server at {}", self.config.url);
            return Ok(());
        }

        let Some(models_dir) = self.config.models_dir.clone() else {
            return Err(VoiceError::BackendUnavailable(format!(
                "kokoro server not reachable at {}",
                self.config.url
            )));
        };

        let (model, voices) =
            download::ensure_voice_models(&self.client, &models_dir, |p| {
                if p.status == "complete" {
                    info!("kokoro: {} ready", p.model);
                } else {
                    debug!("kokoro: downloading {} {:.1}%", p.model, p.percent);
                }
            })
            .await?;

        if !self.sidecar_running() {
            let port = port_from_url(&self.config.url)?;
            self.sidecar = Some(spawn_sidecar(&model, &voices, port)?);
        }

        if let Err(e) = self.wait_for_health().await {
            self.kill_sidecar().await;
            return Err(e);
        }
        Ok(())
    }

    async fn wait_for_health(&self) -> Result<()> {
        let timeout = self.config.startup_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_reachable().await {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                return Err(VoiceError::BackendUnavailable(format!(
                    "kokoro did not become ready within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }
    }

    async fn kill_sidecar(&mut self) {
        if let Some(mut child) = self.sidecar.take() {
            if let Err(e) = child.kill().await {
                warn!("kokoro: failed to kill sidecar: {e}");
            } else {
                info!("kokoro: sidecar stopped");
            }
        }
    }

    async fn synthesize_async(&self, text: &str, voice: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "input": text,
            "voice": voice,
            "model": "kokoro",
            "response_format": "pcm",
            "stream": true,
            "speed": self.config.speed,
        });

        debug!("kokoro: POST {} chars", text.len());
        let resp = match self.client.post(self.speech_url()).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                let detail = resp.text().await.unwrap_or_default();
                return Err(VoiceError::SynthesisFailure(format!(
                    "kokoro error {status}: {detail}"
                )));
            }
            Err(e) => {
                return Err(VoiceError::SynthesisFailure(format!(
                    "kokoro request failed: {e}"
                )));
            }
        };

        let mut samples = Vec::new();
        let mut leftover: Option<u8> = None;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| VoiceError::SynthesisFailure(format!("kokoro stream error: {e}")))?;
            let (decoded, lo) = pcm16_le_to_f32(&chunk, leftover.take());
            leftover = lo;
            samples.extend(decoded);
        }
        if leftover.is_some() {
            debug!("kokoro: dropped trailing odd byte");
        }
        Ok(samples)
    }
}

impl SynthesisBackend for KokoroBackend {
    fn name(&self) -> &str {
        "kokoro"
    }

    fn load(&mut self) -> Result<()> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.load_async())
    }

    fn synthesize(&mut self, text: &str, voice: &str) -> Result<Vec<f32>> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.synthesize_async(text, voice))
    }

    fn unload(&mut self) {
        let runtime = self.runtime.clone();
        runtime.block_on(self.kill_sidecar());
    }

    /// An owned sidecar that exited means the model is gone. A reused
    /// external server is assumed alive.
    fn is_alive(&mut self) -> bool {
        self.sidecar.is_none() || self.sidecar_running()
    }
}

impl Drop for KokoroBackend {
    fn drop(&mut self) {
        if let Some(mut child) = self.sidecar.take() {
            let _ = child.start_kill();
        }
    }
}

fn port_from_url(url: &str) -> Result<u16> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .ok_or_else(|| VoiceError::BackendUnavailable(format!("invalid kokoro url: {url}")))
}

/// koko CLI: `koko --model <path> --data <voices> openai --ip 127.0.0.1 --port <port>`
fn spawn_sidecar(model: &Path, voices: &Path, port: u16) -> Result<Child> {
    let binary = resolve_sidecar(KOKORO_SIDECAR);
    info!("kokoro: starting sidecar {} on port {port}", binary.display());

    let mut child = tokio::process::Command::new(&binary)
        .args([
            "--model",
            &model.to_string_lossy(),
            "--data",
            &voices.to_string_lossy(),
            "openai",
            "--ip",
            "127.0.0.1",
            "--port",
            &port.to_string(),
        ])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            VoiceError::BackendUnavailable(format!("failed to spawn {}: {e}", binary.display()))
        })?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[koko] {line}");
            }
        });
    }
    Ok(child)
}

/// Find a sidecar binary next to the executable, else fall back to `PATH`.
fn resolve_sidecar(name: &str) -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    match exe_dir {
        Some(dir) => resolve_sidecar_in(&dir, name),
        None => PathBuf::from(name),
    }
}

fn resolve_sidecar_in(dir: &Path, name: &str) -> PathBuf {
    let mut candidates = Vec::new();
    if let Some(triple) = target_triple() {
        candidates.push(dir.join(format!("{name}-{triple}")));
        candidates.push(dir.join(format!("{name}-{triple}.exe")));
    }
    candidates.push(dir.join(name));
    candidates.push(dir.join(format!("{name}.exe")));

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

fn target_triple() -> Option<&'static str> {
    if cfg!(all(target_arch = "x86_64", target_os = "linux")) {
        Some("x86_64-unknown-linux-gnu")
    } else if cfg!(all(target_arch = "aarch64", target_os = "linux")) {
        Some("aarch64-unknown-linux-gnu")
    } else if cfg!(all(target_arch = "x86_64", target_os = "macos")) {
        Some("x86_64-apple-darwin")
    } else if cfg!(all(target_arch = "aarch64", target_os = "macos")) {
        Some("aarch64-apple-darwin")
    } else if cfg!(all(target_arch = "x86_64", target_os = "windows")) {
        Some("x86_64-pc-windows-msvc")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    type Requests = Arc<Mutex<Vec<serde_json::Value>>>;

    /// A fake Kokoro server on an ephemeral port. Returns its url, the
    /// requests it received and the runtime that keeps it alive.
    fn mock_server(pcm: Vec<u8>) -> (String, Requests, Runtime) {
        let requests: Requests = Arc::default();
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/v1/audio/speech",
                post(
                    move |State(requests): State<Requests>, Json(body): Json<serde_json::Value>| {
                        let pcm = pcm.clone();
                        async move {
                            requests.lock().unwrap().push(body);
                            pcm
                        }
                    },
                ),
            )
            .with_state(requests.clone());

        let runtime = Runtime::new().unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), requests, runtime)
    }

    fn backend(url: String) -> KokoroBackend {
        KokoroBackend::new(KokoroConfig {
            url,
            startup_timeout: Duration::from_secs(1),
            ..KokoroConfig::default()
        })
        .unwrap()
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn reuses_running_server_and_decodes_pcm() {
        let (url, requests, _server) = mock_server(pcm_bytes(&[0, 16_384, -16_384]));
        let mut kokoro = backend(url);

        kokoro.load().unwrap();
        let samples = kokoro.synthesize("At your service.", "bm_george").unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -0.5]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["input"], "At your service.");
        assert_eq!(requests[0]["voice"], "bm_george");
        assert_eq!(requests[0]["response_format"], "pcm");

        // Nothing was spawned, so nothing to kill
        kokoro.unload();
        assert!(kokoro.sidecar.is_none());
    }

    #[test]
    fn unreachable_server_without_models_dir_is_unavailable() {
        let mut kokoro = backend("http://127.0.0.1:9".into());
        assert!(matches!(
            kokoro.load(),
            Err(VoiceError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn failed_request_is_synthesis_failure() {
        let mut kokoro = backend("http://127.0.0.1:9".into());
        assert!(matches!(
            kokoro.synthesize("Hello.", "bm_george"),
            Err(VoiceError::SynthesisFailure(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exited_sidecar_is_not_alive() {
        let mut kokoro = backend("http://127.0.0.1:9".into());
        assert!(kokoro.is_alive());

        let runtime = kokoro.runtime.clone();
        let mut child = runtime.block_on(async {
            tokio::process::Command::new("true").kill_on_drop(true).spawn()
        })
        .unwrap();
        runtime.block_on(child.wait()).unwrap();
        kokoro.sidecar = Some(child);

        assert!(!kokoro.is_alive());
        assert!(kokoro.sidecar.is_none());
    }

    #[test]
    fn port_comes_from_url() {
        assert_eq!(port_from_url("http://localhost:3001").unwrap(), 3001);
        assert_eq!(port_from_url("http://localhost").unwrap(), 80);
        assert!(port_from_url("not a url").is_err());
    }

    #[test]
    fn urls_tolerate_trailing_slash() {
        let kokoro = backend("http://localhost:3001/".into());
        assert_eq!(kokoro.speech_url(), "http://localhost:3001/v1/audio/speech");
        assert_eq!(kokoro.health_url(), "http://localhost:3001/");
    }

    #[test]
    fn sidecar_resolution_prefers_bundled_binary() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_sidecar_in(dir.path(), "koko"), PathBuf::from("koko"));

        std::fs::write(dir.path().join("koko"), b"").unwrap();
        assert_eq!(resolve_sidecar_in(dir.path(), "koko"), dir.path().join("koko"));

        if let Some(triple) = target_triple() {
            let bundled = dir.path().join(format!("koko-{triple}"));
            std::fs::write(&bundled, b"").unwrap();
            assert_eq!(resolve_sidecar_in(dir.path(), "koko"), bundled);
        }
    }
}
