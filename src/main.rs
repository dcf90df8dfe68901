use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pushup_counter::config::Config;
use pushup_counter::counter::{Detector, LogSink};
use pushup_counter::pose::{Recording, ReplaySource};

const CONFIG_PATH: &str = "config.toml";

/// 記録済みの姿勢ファイルからプッシュアップを数える
#[derive(Parser)]
#[command(name = "pushup-counter", version = env!("GIT_VERSION"))]
struct Cli {
    /// JSON Lines の姿勢記録
    recording: PathBuf,
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
    /// 記録のタイムスタンプどおりの速度で再生
    #[arg(long)]
    realtime: bool,
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
    let recording = Recording::load(&cli.recording)
        .with_context(|| format!("Failed to load {}", cli.recording.display()))?;

    info!("Pushup Counter ({})", env!("GIT_VERSION"));
    info!("Recording: {} frames", recording.len());

    let mut source = ReplaySource::new(recording);
    let mut detector = Detector::new(&config, LogSink::new());

    // 先頭のフレームでキャリブレーション
    detector.start(&mut source).await.context("Calibration failed")?;

    let clock = Instant::now();
    let offset = source.last_timestamp();
    let mut skipped = 0u32;

    while let Some(frame) = source.next_frame() {
        if cli.realtime {
            tokio::time::sleep_until(clock + frame.timestamp.saturating_sub(offset)).await;
        } else {
            tokio::task::yield_now().await;
        }
        if detector.process_frame(&frame.poses(), frame.timestamp).is_none() {
            skipped += 1;
        }
    }

    let count = detector.count();
    detector.stop();
    if skipped > 0 {
        warn!("{} frames were not processed", skipped);
    }

    println!("Total reps: {}", count);
    Ok(())
}
