mod link;
mod logging;
mod shutdown;

use anyhow::Context;
use clap::Parser;
use novaview_core::config::{self, Config};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "novaview-client",
    version,
    about = "Headless spectrum and waterfall client for a WebSocket SDR receiver."
)]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket URL, overriding server.url
    #[arg(long)]
    url: Option<String>,

    /// Frequency to tune to once connected (Hz)
    #[arg(long)]
    tune_hz: Option<f64>,

    /// Debug logging for the client crates
    #[arg(long)]
    debug: bool,

    /// Also write daily rolling log files here
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guards = logging::init(&logging::LoggingConfig {
        debug: args.debug,
        log_dir: args.log_dir.clone(),
        ..logging::LoggingConfig::default()
    })?;

    let mut cfg = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(url) = args.url {
        cfg.server.url = url;
    }
    cfg.validate().context("validate config")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %cfg.server.url,
        "novaview client starting"
    );

    let shutdown = shutdown::Shutdown::install();
    link::run(cfg, args.tune_hz, shutdown).await
}
