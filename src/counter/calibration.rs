use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::pose::{midpoint_y, KeypointIndex, Pose, PoseSource, KEYPOINT_CONFIDENCE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalibrationError {
    /// 規定回数の試行で有効なサンプルが1つも得られなかった
    #[error("no reliable pose observed in {attempts} attempts")]
    NoReliablePose { attempts: usize },
}

/// キャリブレーション時の基準姿勢
///
/// 検出停止・リセットで破棄し、セッションをまたいで使い回さない。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub shoulder_y: f32,
    pub hip_y: f32,
    pub shoulder_width: f32,
    /// 肩〜腰の縦距離（下限あり）
    pub body_height: f32,
    /// 「下がった」とみなす肩の沈み込み量の基準
    pub shoulder_drop_threshold: f32,
}

/// 1フレーム分の有効サンプル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub shoulder_y: f32,
    pub hip_y: f32,
    pub shoulder_width: f32,
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    samples: usize,
    sample_delay: Duration,
    min_shoulder_width: f32,
    min_body_height: f32,
    drop_ratio: f32,
    confidence_threshold: f32,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig, confidence_threshold: f32) -> Self {
        Self {
            samples: config.samples,
            sample_delay: Duration::from_millis(config.sample_delay_ms),
            min_shoulder_width: config.min_shoulder_width,
            min_body_height: config.min_body_height,
            drop_ratio: config.drop_ratio,
            confidence_threshold,
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config, KEYPOINT_CONFIDENCE)
    }

    /// Poseから1サンプルを抽出。肩・腰の中点が取れない、または肩幅が狭すぎる場合は None
    pub fn sample(&self, pose: &Pose) -> Option<CalibrationSample> {
        let shoulder_y = midpoint_y(
            pose,
            KeypointIndex::LeftShoulder,
            KeypointIndex::RightShoulder,
            self.confidence_threshold,
        )?;
        let hip_y = midpoint_y(
            pose,
            KeypointIndex::LeftHip,
            KeypointIndex::RightHip,
            self.confidence_threshold,
        )?;

        let left = pose.get(KeypointIndex::LeftShoulder);
        let right = pose.get(KeypointIndex::RightShoulder);
        let shoulder_width = (left.x - right.x).abs().max(1.0);
        if shoulder_width <= self.min_shoulder_width {
            return None;
        }

        Some(CalibrationSample { shoulder_y, hip_y, shoulder_width })
    }

    /// サンプルの単純平均から基準姿勢を作る。サンプルが空なら None
    pub fn baseline_from_samples(&self, samples: &[CalibrationSample]) -> Option<Baseline> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f32;
        let shoulder_y = samples.iter().map(|s| s.shoulder_y).sum::<f32>() / n;
        let hip_y = samples.iter().map(|s| s.hip_y).sum::<f32>() / n;
        let shoulder_width = samples.iter().map(|s| s.shoulder_width).sum::<f32>() / n;

        let body_height = (hip_y - shoulder_y).abs().max(self.min_body_height);
        Some(Baseline {
            shoulder_y,
            hip_y,
            shoulder_width,
            body_height,
            shoulder_drop_threshold: body_height * self.drop_ratio,
        })
    }

    /// 規定回数サンプリングして基準姿勢を求める
    ///
    /// 各試行の前に `sample_delay` だけ待つ。待機は `tokio::time::sleep` で行うので
    /// 呼び出し元のタスクを譲るだけでスレッドは止めない。
    pub async fn calibrate<S: PoseSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<Baseline, CalibrationError> {
        let mut accepted = Vec::with_capacity(self.samples);

        for attempt in 0..self.samples {
            tokio::time::sleep(self.sample_delay).await;

            let poses = match source.estimate() {
                Ok(poses) => poses,
                Err(e) => {
                    warn!("pose source failed during calibration: {:#}", e);
                    continue;
                }
            };
            let Some(pose) = poses.first() else {
                debug!(attempt, "calibration: no pose");
                continue;
            };
            match self.sample(pose) {
                Some(sample) => {
                    debug!(attempt, ?sample, "calibration sample accepted");
                    accepted.push(sample);
                }
                None => debug!(attempt, "calibration sample rejected"),
            }
        }

        match self.baseline_from_samples(&accepted) {
            Some(baseline) => {
                info!(
                    samples = accepted.len(),
                    shoulder_y = baseline.shoulder_y,
                    drop_threshold = baseline.shoulder_drop_threshold,
                    "calibrated"
                );
                Ok(baseline)
            }
            None => {
                warn!(attempts = self.samples, "calibration failed: no reliable pose");
                Err(CalibrationError::NoReliablePose { attempts: self.samples })
            }
        }
    }
}
