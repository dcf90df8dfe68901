//! Pose sender: streams a recorded pose file to the counter server and logs
//! the statuses it sends back.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pushup_counter::config::Config;
use pushup_counter::pose::Recording;
use pushup_counter::protocol::{self, ClientMessage, ServerMessage};

const CONFIG_PATH: &str = "config.toml";

#[derive(Parser)]
#[command(name = "pose_sender", version = env!("GIT_VERSION"))]
struct Cli {
    /// JSON Lines pose recording
    recording: PathBuf,
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
    /// Overrides `server.server_addr`
    #[arg(long)]
    server: Option<String>,
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
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

    if cli.fps.is_nan() || cli.fps <= 0.0 {
        bail!("--fps must be positive");
    }

    let config = Config::load_or_default(&cli.config);
    let server_addr = cli.server.unwrap_or_else(|| config.server.server_addr.clone());
    let recording = Recording::load(&cli.recording)
        .with_context(|| format!("Failed to load {}", cli.recording.display()))?;

    info!("Pose Sender ({})", env!("GIT_VERSION"));
    info!("Connecting to {}...", server_addr);
    let stream = tokio::net::TcpStream::connect(&server_addr)
        .await
        .with_context(|| format!("Failed to connect to {}", server_addr))?;
    stream.set_nodelay(true)?;
    let (mut sink, mut reader) = protocol::message_stream(stream).split();

    let reader_task = tokio::spawn(async move {
        let mut last_count = 0u32;
        while let Some(result) = reader.next().await {
            let bytes = match result {
                Ok(b) => b,
                Err(e) => {
                    warn!("[tcp] reader error: {}", e);
                    break;
                }
            };
            match bincode::deserialize::<ServerMessage>(&bytes) {
                Ok(ServerMessage::Status(status)) => {
                    if status.count != last_count || !status.running {
                        info!("[{}] {}", status.count, status.message);
                    }
                    last_count = status.count;
                }
                Ok(ServerMessage::Keypoints { .. }) => {}
                Err(e) => warn!("[tcp] deserialize error: {}", e),
            }
        }
        last_count
    });

    // calibration samples whatever frame arrived last, so start streaming right away
    let mut frames = recording.frames.into_iter();
    if let Some(first) = frames.next() {
        let msg = ClientMessage::Frame {
            timestamp_us: first.timestamp_us(),
            poses: first.poses(),
        };
        protocol::send_to_sink(&mut sink, &msg).await?;
    }
    protocol::send_to_sink(&mut sink, &ClientMessage::StartDetection).await?;

    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / cli.fps));
    for frame in frames {
        interval.tick().await;
        let msg = ClientMessage::Frame {
            timestamp_us: frame.timestamp_us(),
            poses: frame.poses(),
        };
        protocol::send_to_sink(&mut sink, &msg).await?;
    }

    protocol::send_to_sink(&mut sink, &ClientMessage::StopDetection).await?;
    sink.close().await?;

    match tokio::time::timeout(Duration::from_secs(5), reader_task).await {
        Ok(Ok(count)) => println!("Total reps: {}", count),
        Ok(Err(e)) => warn!("reader task failed: {}", e),
        Err(_) => warn!("server did not close the connection"),
    }
    Ok(())
}
