use crate::config::PostureConfig;
use crate::pose::{angle_degrees, keypoint_at, KeypointIndex, Pose};

use super::calibration::Baseline;

/// 1フレーム分の姿勢シグナル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    /// 左右の肘角度の平均（度）
    pub elbow_angle: f32,
    /// 基準からの肩の沈み込み（正 = 下がった）
    pub shoulder_drop: f32,
    /// 両手首が肩の下付近にあるか
    pub wrists_under: bool,
    pub shoulder_mid_y: f32,
    pub shoulder_width: f32,
}

struct Side {
    shoulder: KeypointIndex,
    elbow: KeypointIndex,
    wrist: KeypointIndex,
}

const LEFT: Side = Side {
    shoulder: KeypointIndex::LeftShoulder,
    elbow: KeypointIndex::LeftElbow,
    wrist: KeypointIndex::LeftWrist,
};

const RIGHT: Side = Side {
    shoulder: KeypointIndex::RightShoulder,
    elbow: KeypointIndex::RightElbow,
    wrist: KeypointIndex::RightWrist,
};

pub struct PostureEvaluator {
    keypoint_confidence: f32,
    wrist_confidence: f32,
    wrist_alignment_ratio: f32,
}

impl PostureEvaluator {
    pub fn from_config(config: &PostureConfig) -> Self {
        Self {
            keypoint_confidence: config.keypoint_confidence,
            wrist_confidence: config.wrist_confidence,
            wrist_alignment_ratio: config.wrist_alignment_ratio,
        }
    }

    /// 肩が見えていなければ None（このフレームはレップ判定に使わない）
    pub fn evaluate(&self, pose: &Pose, baseline: &Baseline) -> Option<Signals> {
        let left_shoulder = keypoint_at(pose, KeypointIndex::LeftShoulder);
        let right_shoulder = keypoint_at(pose, KeypointIndex::RightShoulder);
        if !left_shoulder.is_valid(self.keypoint_confidence)
            || !right_shoulder.is_valid(self.keypoint_confidence)
        {
            return None;
        }

        let shoulder_mid_y = (left_shoulder.y + right_shoulder.y) / 2.0;
        let shoulder_width = (left_shoulder.x - right_shoulder.x).abs();

        // 肘・手首の信頼度は見ない。潰れたベクトルは 180° 扱いになる
        let elbow_angle = (Self::elbow_angle(pose, &LEFT) + Self::elbow_angle(pose, &RIGHT)) / 2.0;

        let wrists_under = self.wrist_under(pose, &LEFT, shoulder_width)
            && self.wrist_under(pose, &RIGHT, shoulder_width);

        Some(Signals {
            elbow_angle,
            shoulder_drop: shoulder_mid_y - baseline.shoulder_y,
            wrists_under,
            shoulder_mid_y,
            shoulder_width,
        })
    }

    fn elbow_angle(pose: &Pose, side: &Side) -> f32 {
        angle_degrees(
            pose.get(side.shoulder).position(),
            pose.get(side.elbow).position(),
            pose.get(side.wrist).position(),
        )
    }

    fn wrist_under(&self, pose: &Pose, side: &Side, shoulder_width: f32) -> bool {
        let wrist = keypoint_at(pose, side.wrist);
        let shoulder = keypoint_at(pose, side.shoulder);
        wrist.is_valid(self.wrist_confidence)
            && (wrist.x - shoulder.x).abs() < self.wrist_alignment_ratio * shoulder_width
    }
}
