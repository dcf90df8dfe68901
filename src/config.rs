use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub posture: PostureConfig,
    #[serde(default)]
    pub repetition: RepetitionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    /// サンプル取得回数
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// 各サンプル前の待ち時間（ミリ秒）
    #[serde(default = "default_sample_delay_ms")]
    pub sample_delay_ms: u64,
    /// これ以下の肩幅のサンプルは捨てる（ピクセル）
    #[serde(default = "default_min_shoulder_width")]
    pub min_shoulder_width: f32,
    /// 体幹の高さの下限（ピクセル）
    #[serde(default = "default_min_body_height")]
    pub min_body_height: f32,
    /// 体幹の高さに対する肩の沈み込み閾値の比率
    #[serde(default = "default_drop_ratio")]
    pub drop_ratio: f32,
}

fn default_samples() -> usize { 6 }
fn default_sample_delay_ms() -> u64 { 120 }
fn default_min_shoulder_width() -> f32 { 10.0 }
fn default_min_body_height() -> f32 { 20.0 }
fn default_drop_ratio() -> f32 { 0.18 }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            sample_delay_ms: default_sample_delay_ms(),
            min_shoulder_width: default_min_shoulder_width(),
            min_body_height: default_min_body_height(),
            drop_ratio: default_drop_ratio(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostureConfig {
    /// 肩・肘・腰などに要求する信頼度
    #[serde(default = "default_keypoint_confidence")]
    pub keypoint_confidence: f32,
    /// 手首の位置チェックに要求する信頼度
    #[serde(default = "default_wrist_confidence")]
    pub wrist_confidence: f32,
    /// 手首と肩の水平距離の上限（肩幅に対する比率）
    #[serde(default = "default_wrist_alignment_ratio")]
    pub wrist_alignment_ratio: f32,
}

fn default_keypoint_confidence() -> f32 { 0.35 }
fn default_wrist_confidence() -> f32 { 0.25 }
fn default_wrist_alignment_ratio() -> f32 { 0.9 }

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            keypoint_confidence: default_keypoint_confidence(),
            wrist_confidence: default_wrist_confidence(),
            wrist_alignment_ratio: default_wrist_alignment_ratio(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepetitionConfig {
    /// これ未満の肘角度で「下」
    #[serde(default = "default_down_elbow_angle")]
    pub down_elbow_angle: f32,
    /// これより大きい肘角度で「上」
    #[serde(default = "default_up_elbow_angle")]
    pub up_elbow_angle: f32,
    #[serde(default = "default_down_drop_fraction")]
    pub down_drop_fraction: f32,
    #[serde(default = "default_up_drop_fraction")]
    pub up_drop_fraction: f32,
    /// 下の姿勢の最低保持時間（ミリ秒）
    #[serde(default = "default_min_hold_ms")]
    pub min_hold_ms: u64,
    /// レップ間の最短間隔（ミリ秒）
    #[serde(default = "default_min_rep_interval_ms")]
    pub min_rep_interval_ms: u64,
}

fn default_down_elbow_angle() -> f32 { 90.0 }
fn default_up_elbow_angle() -> f32 { 160.0 }
fn default_down_drop_fraction() -> f32 { 0.85 }
fn default_up_drop_fraction() -> f32 { 0.45 }
fn default_min_hold_ms() -> u64 { 250 }
fn default_min_rep_interval_ms() -> u64 { 800 }

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            down_elbow_angle: default_down_elbow_angle(),
            up_elbow_angle: default_up_elbow_angle(),
            down_drop_fraction: default_down_drop_fraction(),
            up_drop_fraction: default_up_drop_fraction(),
            min_hold_ms: default_min_hold_ms(),
            min_rep_interval_ms: default_min_rep_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
}

fn default_listen_addr() -> String { "0.0.0.0:9100".to_string() }
fn default_server_addr() -> String { "127.0.0.1:9100".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// 読み込めなければデフォルト設定で続行
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }
}
