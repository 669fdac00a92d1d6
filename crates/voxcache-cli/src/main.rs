//! voxcache CLI: cache-first voice engine.
//!
//! ```text
//! voxcache serve [--port 2003] [--host 127.0.0.1] [--voice bm_george] [--minimal]
//! voxcache say "Diagnostics complete."
//! voxcache pregenerate [phrases...]
//! voxcache speak "hello" / queue "hello" / stop / status [--server ...]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxcache_core::types::{KokoroConfig, VoiceConfig, COMMON_PHRASES};
use voxcache_lib::backend::{DisabledBackend, SynthesisBackend};
use voxcache_lib::kokoro::KokoroBackend;
use voxcache_lib::playback::{NullPlayback, PlaybackChannel, RodioPlayback};
use voxcache_lib::worker::TaskOutcome;
use voxcache_lib::{SpeakOutcome, VoiceEngine};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// voxcache: voice engine that speaks from a synthesized-speech cache
#[derive(Parser)]
#[command(name = "voxcache", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EngineArgs {
    /// Directory holding cached clips
    #[arg(long, env = "VOXCACHE_CACHE_DIR", default_value = "voxcache_cache")]
    cache_dir: PathBuf,
    /// Kokoro TTS server URL
    #[arg(long, env = "VOXCACHE_KOKORO_URL", default_value = "http://localhost:3001")]
    kokoro_url: String,
    /// Kokoro voice id
    #[arg(long, env = "VOXCACHE_VOICE", default_value = "bm_george")]
    voice: String,
    /// TTS speed
    #[arg(long, default_value = "1.08")]
    speed: f32,
    /// Download models here and run Kokoro as a sidecar when no server is up
    #[arg(long, env = "VOXCACHE_MODELS_DIR")]
    models_dir: Option<PathBuf>,
    /// Unload the voice model after this many idle seconds
    #[arg(long, default_value = "300")]
    idle_timeout: u64,
    /// Cached phrases only; never load the neural voice
    #[arg(long)]
    minimal: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the voice server
    Serve {
        /// Listen port
        #[arg(long, default_value = "2003")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Speak text locally and wait for it to finish
    Say {
        /// Text to speak
        text: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Fill the cache without playing anything
    Pregenerate {
        /// Phrases to generate (defaults to the built-in assistant phrases)
        phrases: Vec<String>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Send text to the running server for speech
    Speak {
        /// Text to speak
        text: String,
        /// Server URL
        #[arg(long, default_value = "http://localhost:2003")]
        server: String,
    },
    /// Ask the running server to pre-generate a phrase
    Queue {
        /// Text to cache
        text: String,
        #[arg(long, default_value = "http://localhost:2003")]
        server: String,
    },
    /// Stop speech on the running server
    Stop {
        #[arg(long, default_value = "http://localhost:2003")]
        server: String,
    },
    /// Get server status
    Status {
        #[arg(long, default_value = "http://localhost:2003")]
        server: String,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("voxcache=info,voxcache_lib=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("voxcache: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> CliResult<ExitCode> {
    match command {
        Command::Serve { port, host, engine } => {
            let engine = Arc::new(build_engine(&engine, true, Arc::new(RodioPlayback::new()?))?);
            serve(engine.clone(), &host, port)?;
            // Last reference dropped here, outside the server runtime
            engine.shutdown();
            Ok(ExitCode::SUCCESS)
        }

        Command::Say { text, engine } => {
            let engine = build_engine(&engine, false, Arc::new(RodioPlayback::new()?))?;
            let outcome = engine.speak(&text, true);
            engine.shutdown();
            match outcome {
                SpeakOutcome::Played(source) => {
                    info!("spoke from {source:?}");
                    Ok(ExitCode::SUCCESS)
                }
                SpeakOutcome::Skipped => {
                    eprintln!("voxcache: nothing to say");
                    Ok(ExitCode::SUCCESS)
                }
                SpeakOutcome::Dispatched => Ok(ExitCode::SUCCESS),
                SpeakOutcome::Failed(e) => {
                    eprintln!("voxcache: {e}");
                    println!("{text}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Pregenerate { phrases, engine } => {
            let engine = build_engine(&engine, false, Arc::new(NullPlayback))?;
            let phrases = if phrases.is_empty() {
                COMMON_PHRASES.iter().map(|p| p.to_string()).collect()
            } else {
                phrases
            };

            let report = engine.pregenerate(&phrases, |i, total, phrase, outcome| {
                let mark = match outcome {
                    TaskOutcome::Cached => "+",
                    TaskOutcome::AlreadyCached => "=",
                    TaskOutcome::Failed(_) => "!",
                };
                println!("[{i}/{total}] {mark} {phrase}");
            })?;
            engine.shutdown();

            println!(
                "{} generated, {} already cached, {} failed ({} phrases, {:.1}s of audio)",
                report.generated,
                report.already_cached,
                report.failed,
                engine.cache().len(),
                engine.cache().total_duration_secs()
            );
            Ok(if report.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Speak { text, server } => {
            remote(&server, "speak", Some(serde_json::json!({ "text": text })))
        }
        Command::Queue { text, server } => {
            remote(&server, "queue", Some(serde_json::json!({ "text": text })))
        }
        Command::Stop { server } => remote(&server, "stop", None),
        Command::Status { server } => remote(&server, "status", None),
    }
}

fn build_engine(
    args: &EngineArgs,
    bootstrap: bool,
    playback: Arc<dyn PlaybackChannel>,
) -> CliResult<VoiceEngine> {
    let config = VoiceConfig {
        cache_dir: args.cache_dir.clone(),
        idle_timeout: Duration::from_secs(args.idle_timeout),
        bootstrap_phrases: if bootstrap && !args.minimal {
            COMMON_PHRASES.iter().map(|p| p.to_string()).collect()
        } else {
            Vec::new()
        },
        ..VoiceConfig::default()
    };

    let backend: Box<dyn SynthesisBackend> = if args.minimal {
        info!("minimal mode: cached phrases only");
        Box::new(DisabledBackend)
    } else {
        Box::new(KokoroBackend::new(KokoroConfig {
            url: args.kokoro_url.clone(),
            speed: args.speed,
            models_dir: args.models_dir.clone(),
            ..KokoroConfig::default()
        })?)
    };

    Ok(VoiceEngine::new(config, backend, args.voice.clone(), playback)?)
}

fn serve(engine: Arc<VoiceEngine>, host: &str, port: u16) -> CliResult<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        eprintln!("voxcache listening on {addr}");

        let app = voxcache_lib::server::router(engine);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

/// Call the running server and print its JSON reply.
fn remote(server: &str, endpoint: &str, body: Option<serde_json::Value>) -> CliResult<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let client = reqwest::Client::new();
        let url = format!("{server}/{endpoint}");
        let req = match body {
            Some(body) => client.post(url).json(&body),
            None if endpoint == "status" => client.get(url),
            None => client.post(url),
        };
        let resp = req.send().await?;
        let ok = resp.status().is_success();
        println!("{}", resp.text().await.unwrap_or_default());
        Ok::<_, Box<dyn std::error::Error>>(if ok {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    })
}
