//! Counter server: receives poses and control commands over TCP, runs
//! calibration + repetition detection, and replies with status updates.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pushup_counter::config::Config;
use pushup_counter::server::serve_connection;

const CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(name = "counter_server", version = env!("GIT_VERSION"))]
struct Cli {
    #[arg(long, default_value = CONFIG_PATH)]
    config: String,
    /// Overrides `server.listen_addr`
    #[arg(long)]
    listen: Option<String>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load_or_default(&cli.config);
    let listen_addr = cli.listen.unwrap_or_else(|| config.server.listen_addr.clone());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Counter Server ({}) listening on {}", env!("GIT_VERSION"), listen_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!("[tcp] client connected: {}", addr);

        match serve_connection(stream, &config).await {
            Ok(count) => info!("[tcp] client disconnected: {} (reps: {})", addr, count),
            Err(e) => warn!("[tcp] session error: {:#}", e),
        }
    }
}
