//! 角度・中点などの幾何プリミティブ
//!
//! 座標は画像座標系（Yは下向きが正）。

use super::keypoint::{Keypoint, KeypointIndex, Pose};

/// 幾何計算に使ってよいキーポイントの最低信頼度
pub const KEYPOINT_CONFIDENCE: f32 = 0.35;

/// インデックス位置のキーポイントを取得
pub fn keypoint_at(pose: &Pose, index: KeypointIndex) -> Keypoint {
    *pose.get(index)
}

/// 2点のY座標の平均。どちらかの信頼度が閾値未満なら None
pub fn midpoint_y(pose: &Pose, a: KeypointIndex, b: KeypointIndex, threshold: f32) -> Option<f32> {
    let a = pose.get(a);
    let b = pose.get(b);
    if !a.is_valid(threshold) || !b.is_valid(threshold) {
        return None;
    }
    Some((a.y + b.y) / 2.0)
}

/// 頂点 b における角度（度）
///
/// cos(θ) = (ba · bc) / (|ba| × |bc|)
///
/// どちらかのベクトル長が 0 の場合は 180°（伸び切り）を返す。
pub fn angle_degrees(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    let v1 = (a.0 - b.0, a.1 - b.1);
    let v2 = (c.0 - b.0, c.1 - b.1);

    let mag1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let mag2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if mag1 == 0.0 || mag2 == 0.0 {
        return 180.0;
    }

    let dot = v1.0 * v2.0 + v1.1 * v2.1;
    // 浮動小数の誤差で [-1, 1] を僅かに超えると acos が NaN になる
    let cos_angle = (dot / (mag1 * mag2)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees()
}
