//! SyncStream demo client — entry point.
//!
//! ```text
//! syncstream                     Run the scripted pairing demo
//! syncstream --config <path>     Use custom config TOML
//! syncstream --gen-config        Dump default config and exit
//! syncstream -q "what is this?"  Ask a custom question
//! ```
//!
//! The demo pairs a sender and a receiver inside one process over the
//! in-memory rendezvous: the sender shares a synthetic screen, the
//! receiver dials the generated code, snapshots a frame, and asks the
//! configured analyzer one question about it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use syncstream_core::{
    AppEvent, AppState, ConnectionStateMachine, MachineConfig, MemoryRendezvous, PeerError,
    ScreenAnalyzer, Snapshot,
};

use syncstream_cli::capture::SyntheticCapture;
use syncstream_cli::config::AppConfig;
use syncstream_cli::gemini::GeminiAnalyzer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "syncstream", about = "SyncStream pairing and screen-analysis demo")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "syncstream.toml")]
    config: PathBuf,

    /// Question to ask about the shared screen.
    #[arg(short, long, default_value = "What is on this screen?")]
    question: String,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Offline analyzer ─────────────────────────────────────────────

/// Fallback analyzer used when no API key is configured.
struct CannedAnalyzer;

#[async_trait]
impl ScreenAnalyzer for CannedAnalyzer {
    async fn analyze(&self, snapshot: &Snapshot, question: &str) -> Result<String, PeerError> {
        Ok(format!(
            "(offline) The shared screen is a {}x{} test pattern. You asked: \"{question}\"",
            snapshot.width(),
            snapshot.height(),
        ))
    }
}

// ── Demo driving ─────────────────────────────────────────────────

/// Drive a machine until `pred` holds.
async fn drive_until(
    machine: &mut ConnectionStateMachine,
    what: &str,
    pred: impl Fn(&ConnectionStateMachine) -> bool,
) -> Result<(), Box<dyn std::error::Error>> {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !pred(machine) {
            if !machine.step().await {
                return Err(format!("{what}: event channel closed"));
            }
        }
        Ok(())
    })
    .await
    .map_err(|_| format!("{what}: timed out"))??;
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = AppConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("syncstream v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Collaborators ────────────────────────────────────────

    let rendezvous = MemoryRendezvous::new();
    let machine_config = MachineConfig {
        connect_timeout: Duration::from_millis(config.network.connect_timeout_ms),
    };

    let analyzer: Arc<dyn ScreenAnalyzer> = match GeminiAnalyzer::from_env(&config.ai) {
        Some(gemini) => {
            info!("using Gemini model {}", config.ai.model);
            Arc::new(gemini)
        }
        None => {
            info!(
                "{} not set; using the offline analyzer",
                config.ai.api_key_env
            );
            Arc::new(CannedAnalyzer)
        }
    };

    let mut sender = ConnectionStateMachine::new(
        Arc::new(SyntheticCapture::new(640, 360)),
        Arc::new(rendezvous.clone()),
        Arc::new(CannedAnalyzer),
        machine_config.clone(),
    );
    let mut receiver = ConnectionStateMachine::new(
        Arc::new(SyntheticCapture::new(640, 360)),
        Arc::new(rendezvous.clone()),
        analyzer,
        machine_config,
    );

    // ── 2. Pair by code ─────────────────────────────────────────

    sender.handle(AppEvent::StartSender).await;
    let code = sender
        .code()
        .ok_or("sender failed to activate")?
        .to_string();
    info!("sender waiting under code {code}");

    receiver.handle(AppEvent::StartReceiver).await;
    receiver.handle(AppEvent::SubmitCode(code)).await;

    drive_until(&mut sender, "sender", |m| {
        m.state() == AppState::SenderSharing
    })
    .await?;
    drive_until(&mut receiver, "receiver", |m| {
        m.state() == AppState::ReceiverViewing
    })
    .await?;
    info!("paired: sender sharing, receiver viewing");

    // ── 3. Snapshot and ask ─────────────────────────────────────

    receiver.handle(AppEvent::OpenAnalysis).await;
    receiver
        .handle(AppEvent::AskQuestion(cli.question.clone()))
        .await;
    drive_until(&mut receiver, "analysis", |m| {
        m.exchange().interaction().is_some()
    })
    .await?;

    if let Some(interaction) = receiver.exchange().interaction() {
        println!("Q: {}", interaction.question);
        println!("A: {}", interaction.answer);
    }

    // ── 4. Teardown ─────────────────────────────────────────────

    receiver.handle(AppEvent::Disconnect).await;
    sender.handle(AppEvent::Cancel).await;
    info!("both sides back to idle");

    Ok(())
}
