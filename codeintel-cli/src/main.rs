//! Minimal driver binary demonstrating `codeintel-engine`'s session
//! lifecycle: initialize against a workspace, wait for bootstrap, run one
//! query, shut down cleanly on Ctrl+C/SIGTERM.
//!
//! Not the deliverable — a thin example the way the teacher splits a
//! `-core` library crate from its own thin CLI shell.

use std::path::PathBuf;

use clap::Parser;
use codeintel_engine::orchestrator::{shutdown_signal, Session, SessionOptions};
use codeintel_engine::types::{Depth, ProviderRequirement, QueryRequest};
use tracing::info;

#[derive(Parser)]
#[command(name = "codeintel-demo", about = "Demonstration driver for codeintel-engine")]
struct Cli {
    /// Workspace root to index (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Natural-language intent to query after bootstrap completes
    #[arg(long)]
    query: Option<String>,

    /// Depth of the query response
    #[arg(long, default_value = "l1")]
    depth: String,

    /// Skip the file watcher (useful for one-shot runs)
    #[arg(long)]
    skip_watcher: bool,

    /// Stay running after the query, watching for changes until Ctrl+C
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));

    let options = SessionOptions { skip_watcher: cli.skip_watcher || !cli.watch, ..Default::default() };

    let session = match Session::initialize(&root, options, None) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to initialize session: {} ({})", e, e.code());
            if let Some(steps) = e.remediation() {
                for step in steps {
                    eprintln!("  - {step}");
                }
            }
            std::process::exit(1);
        }
    };

    if let Some(Err(e)) = session.wait_for_bootstrap() {
        eprintln!("bootstrap failed: {e}");
    }

    let stats = session.stats().unwrap_or_default();
    info!(?stats, "bootstrap complete");

    if let Some(intent) = cli.query {
        let depth = match cli.depth.to_lowercase().as_str() {
            "l0" => Depth::L0,
            "l2" => Depth::L2,
            _ => Depth::L1,
        };
        let request = QueryRequest {
            intent,
            depth,
            embedding_requirement: ProviderRequirement::Optional,
            deterministic: true,
            ..Default::default()
        };
        match session.query(request) {
            Ok(response) => {
                println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
            }
            Err(e) => {
                eprintln!("query failed: {} ({})", e, e.code());
                std::process::exit(1);
            }
        }
    }

    if cli.watch {
        shutdown_signal().await;
    }

    session.shutdown();
}
