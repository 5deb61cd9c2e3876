use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use playlist_dl_engine::api::engine_api::Engine;
use playlist_dl_engine::api::telemetry::init_tracing;
use playlist_dl_engine::config::EngineConfig;

#[derive(Parser)]
#[command(name = "playlist-dl")]
#[command(about = "Extract playlists and download their items with live progress", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file; missing files fall back to defaults.
    #[arg(long, default_value = "playlist-dl.toml")]
    config: PathBuf,

    /// Override the bind address, e.g. 0.0.0.0:8000.
    #[arg(long)]
    bind: Option<String>,

    /// Override the downloads root directory.
    #[arg(long)]
    downloads_dir: Option<PathBuf>,

    #[arg(long, value_parser = ["error", "warn", "info", "debug", "trace"], default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = EngineConfig::load_from(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(dir) = cli.downloads_dir {
        config.downloads_dir = dir;
    }

    let engine = Engine::start(config).await?;
    info!("serving on {}", engine.server().url("/"));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.dispose().await;
    Ok(())
}
