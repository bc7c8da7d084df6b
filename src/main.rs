//! # Mimir CLI (`mimir`)
//!
//! ## Usage
//!
//! ```bash
//! mimir --config ./config/mimir.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mimir serve` | Start the HTTP server |
//! | `mimir ask "<query>"` | Print a streamed answer to stdout |
//! | `mimir ask "<query>" --no-stream` | Print the answer once it is complete |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`).

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

use mimir::config;
use mimir::orchestrator::AnswerOrchestrator;
use mimir::server;

/// Mimir: ask questions about technical documentation and get answers
/// grounded in it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mimir.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mimir",
    about = "Mimir: retrieval-augmented answers over technical documentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mimir.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `POST /ask`, `GET /health`
    /// and `GET /`.
    Serve,

    /// Answer a single question.
    ///
    /// Fragments are printed as they arrive. Ctrl-C stops generation.
    Ask {
        /// The question to answer.
        query: String,

        /// Wait for the complete answer instead of streaming it.
        #[arg(long)]
        no_stream: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { query, no_stream } => {
            let orchestrator = AnswerOrchestrator::from_config(&cfg).await?;
            if no_stream {
                let answer = orchestrator.answer_query_complete(&query).await?;
                println!("{}", answer);
            } else {
                ask_streaming(&orchestrator, &query).await?;
            }
        }
    }

    Ok(())
}

async fn ask_streaming(orchestrator: &AnswerOrchestrator, query: &str) -> anyhow::Result<()> {
    let mut fragments = orchestrator.answer_query(query).await?;

    let cancel = fragments.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        write!(stdout, "{}", fragment?)?;
        stdout.flush()?;
    }

    if fragments.is_cancelled() {
        eprintln!("\n(cancelled)");
    } else {
        writeln!(stdout)?;
    }
    Ok(())
}
