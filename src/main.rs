mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use iris_backend::BackendConfig;
use iris_engine::{EngineConfig, SessionEngine};
use iris_llm::HttpTransport;
use iris_settings::{load_settings, load_settings_from_path, IrisSettings, LogFormat};
use iris_store::EntityStore;
use iris_telemetry::{init_telemetry, LogOutput, TelemetryConfig};

/// Iris: a streaming assistant chat client and its demo backend.
#[derive(Parser, Debug)]
#[command(name = "iris", version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.iris/settings.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo generation backend.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Delay between streamed tokens
        #[arg(long)]
        token_delay_ms: Option<u64>,
    },
    /// Chat with the backend from the terminal.
    Chat {
        /// Backend base URL, e.g. http://localhost:8000
        #[arg(long)]
        backend_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_settings().context("loading settings")?,
    };

    let output = match settings.logging.format {
        LogFormat::Json => LogOutput::Json,
        LogFormat::Pretty => LogOutput::Pretty,
    };
    let _telemetry = init_telemetry(TelemetryConfig::from_level_str(&settings.logging.level, output))?;

    match cli.command {
        Command::Serve {
            host,
            port,
            token_delay_ms,
        } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(delay) = token_delay_ms {
                settings.server.token_delay_ms = delay;
            }
            serve(&settings).await
        }
        Command::Chat { backend_url } => {
            if let Some(url) = backend_url {
                settings.backend.base_url = url;
            }
            chat(&settings).await
        }
    }
}

async fn serve(settings: &IrisSettings) -> Result<()> {
    let handle = iris_backend::start(BackendConfig::from_settings(&settings.server))
        .await
        .context("starting backend")?;
    println!("Listening on {}", handle.base_url());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await?;
    Ok(())
}

async fn chat(settings: &IrisSettings) -> Result<()> {
    let transport = HttpTransport::new(&settings.backend)?;
    tracing::info!(url = transport.url(), "chat session starting");

    let engine = SessionEngine::new(
        EntityStore::seeded(&settings.session),
        Arc::new(transport),
        EngineConfig::from_settings(settings),
    );
    repl::Repl::new(engine).run().await
}
