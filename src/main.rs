use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use travel_voice::audio::{AudioBackend, FileBackend, LevelMeter, MicBackend};
use travel_voice::session::{run_mic_test, ChannelListener, VoiceEvent, VoiceSession};
use travel_voice::{create_router, AppState, Config};

#[derive(Parser)]
#[command(name = "travel-voice")]
#[command(about = "Voice input and streaming dictation for the travel planner")]
struct Cli {
    /// Configuration file (default: config/travel-voice.toml if present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control API
    Serve,

    /// Dictate from the microphone (or a WAV file) and print the text
    Transcribe {
        /// WAV file to stream instead of the microphone
        file: Option<PathBuf>,

        /// Pace file blocks at capture speed instead of sending as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Input device name (default: the system default input)
        #[arg(long, conflicts_with = "file")]
        device: Option<String>,
    },

    /// Capture-only level check; opens no connection
    MicTest {
        /// WAV file to measure instead of the microphone
        file: Option<PathBuf>,

        /// Test window in seconds
        #[arg(long, default_value = "5")]
        window_secs: u64,

        /// Input device name (default: the system default input)
        #[arg(long, conflicts_with = "file")]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Must happen before the first TLS handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    info!("Travel Voice v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Transcribe {
            file,
            realtime,
            device,
        } => {
            let backend = capture_backend(&cfg, file, realtime, device);
            transcribe(cfg, backend).await
        }
        Commands::MicTest {
            file,
            window_secs,
            device,
        } => {
            let backend = capture_backend(&cfg, file, true, device);
            mic_test(backend, window_secs).await
        }
    }
}

/// The microphone unless a WAV file is given
fn capture_backend(
    cfg: &Config,
    file: Option<PathBuf>,
    realtime: bool,
    device: Option<String>,
) -> Box<dyn AudioBackend> {
    match file {
        Some(file) => Box::new(FileBackend::new(file, cfg.audio.clone()).realtime(realtime)),
        None => {
            let mic = MicBackend::new(cfg.audio.clone());
            Box::new(match device {
                Some(name) => mic.with_device(name),
                None => mic,
            })
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    info!("Loaded config: {}", cfg.service.name);
    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let app = create_router(AppState::new(cfg));

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn transcribe(cfg: Config, backend: Box<dyn AudioBackend>) -> Result<()> {
    let session_id = format!("cli-{}", uuid::Uuid::new_v4());
    let (listener, mut events) = ChannelListener::new();
    let session = VoiceSession::new(
        cfg.session_config(session_id),
        cfg.connector(),
        Arc::new(listener),
    );

    let source = backend.name().to_string();
    session
        .start(backend)
        .await
        .with_context(|| format!("Failed to start transcription from {}", source))?;
    info!("Listening on {}; press Ctrl-C to finish", source);

    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(VoiceEvent::Result { text, .. }) => println!("{}", text),
                Some(VoiceEvent::Error(e)) => {
                    error!("{}", e);
                    if e.is_terminal() {
                        failure = Some(e);
                    }
                }
                Some(VoiceEvent::Stopped) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, finishing session");
                session.stop().await;
            }
        }
    }

    let stats = session.stop().await;
    info!(
        "Sent {} frames, received {} segments in {:.1}s",
        stats.frames_sent, stats.transcript_segments_count, stats.duration_secs
    );

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn mic_test(mut backend: Box<dyn AudioBackend>, window_secs: u64) -> Result<()> {
    let report = run_mic_test(
        backend.as_mut(),
        Duration::from_secs(window_secs),
        &LevelMeter::new(),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.heard_signal() {
        info!("Peak level {:.1}%", report.peak_percent());
    } else {
        warn!("No signal above threshold during the test window");
    }

    Ok(())
}
