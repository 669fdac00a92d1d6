//! HTTP control API for the voice engine.
//!
//! Runs on port 2003 by default. CORS-permissive so a local front end can
//! call it from the browser. Handlers never block the async runtime: speech
//! is dispatched to its own thread and the rest only reads atomics.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use voxcache_core::text::is_speakable;
use voxcache_core::types::EngineStatus;

use crate::engine::{SpeakOutcome, VoiceEngine};

pub const DEFAULT_PORT: u16 = 2003;

/// Build the axum router with a shared [`VoiceEngine`].
pub fn router(engine: Arc<VoiceEngine>) -> Router {
    Router::new()
        .route("/speak", post(speak))
        .route("/queue", post(queue))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

#[derive(serde::Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(serde::Serialize)]
struct SpeakResponse {
    ok: bool,
    cached: bool,
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

async fn speak(
    State(engine): State<Arc<VoiceEngine>>,
    Json(req): Json<TextRequest>,
) -> Json<SpeakResponse> {
    let cached = engine.cache().contains(&req.text);
    let outcome = engine.speak(&req.text, false);
    Json(SpeakResponse {
        ok: matches!(outcome, SpeakOutcome::Dispatched),
        cached,
    })
}

async fn queue(
    State(engine): State<Arc<VoiceEngine>>,
    Json(req): Json<TextRequest>,
) -> Json<OkResponse> {
    engine.queue_for_generation(&req.text);
    Json(OkResponse {
        ok: is_speakable(&req.text),
    })
}

async fn stop(State(engine): State<Arc<VoiceEngine>>) -> Json<OkResponse> {
    engine.stop();
    Json(OkResponse { ok: true })
}

async fn status(State(engine): State<Arc<VoiceEngine>>) -> Json<EngineStatus> {
    Json(engine.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use voxcache_core::types::VoiceConfig;

    use crate::test_support::{RecordingPlayback, StubBackend};

    struct Harness {
        url: String,
        engine: Arc<VoiceEngine>,
        playback: Arc<RecordingPlayback>,
        runtime: tokio::runtime::Runtime,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = VoiceConfig {
            cache_dir: dir.path().to_path_buf(),
            queue_poll: Duration::from_millis(10),
            bootstrap_phrases: Vec::new(),
            ..VoiceConfig::default()
        };
        let (backend, _) = StubBackend::healthy();
        let playback = RecordingPlayback::new();
        let engine = Arc::new(
            VoiceEngine::new(config, Box::new(backend), "bm_george", playback.clone()).unwrap(),
        );

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(engine.clone());
        runtime.spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Harness {
            url: format!("http://{addr}"),
            engine,
            playback,
            runtime,
            _dir: dir,
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    impl Harness {
        fn post(&self, path: &str, body: serde_json::Value) -> serde_json::Value {
            let url = format!("{}{path}", self.url);
            self.runtime.block_on(async {
                reqwest::Client::new()
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .unwrap()
                    .json()
                    .await
                    .unwrap()
            })
        }

        fn status(&self) -> EngineStatus {
            let url = format!("{}/status", self.url);
            self.runtime.block_on(async {
                reqwest::get(url).await.unwrap().json().await.unwrap()
            })
        }
    }

    #[test]
    fn speak_dispatches_and_reports_cache_state() {
        let h = harness();

        let resp = h.post("/speak", serde_json::json!({ "text": "Right away, sir." }));
        assert_eq!(resp, serde_json::json!({ "ok": true, "cached": false }));
        wait_until(|| h.playback.play_count() == 1 && h.engine.cache().len() == 1);
        assert_eq!(h.playback.play_count(), 1);

        let resp = h.post("/speak", serde_json::json!({ "text": "right away, sir." }));
        assert_eq!(resp, serde_json::json!({ "ok": true, "cached": true }));
    }

    #[test]
    fn speak_rejects_empty_text() {
        let h = harness();
        let resp = h.post("/speak", serde_json::json!({ "text": "   " }));
        assert_eq!(resp["ok"], false);
    }

    #[test]
    fn queue_prewarms_cache() {
        let h = harness();
        let resp = h.post("/queue", serde_json::json!({ "text": "Opening Calculator." }));
        assert_eq!(resp["ok"], true);
        wait_until(|| h.engine.cache().contains("Opening Calculator."));
        assert!(h.engine.cache().contains("Opening Calculator."));
        assert_eq!(h.playback.play_count(), 0);
    }

    #[test]
    fn stop_and_status() {
        let h = harness();
        let resp = h.post("/stop", serde_json::json!({}));
        assert_eq!(resp["ok"], true);
        assert_eq!(h.playback.stop_count(), 1);

        let status = h.status();
        assert!(!status.speaking);
        assert_eq!(status.cached_phrases, 0);
    }
}
