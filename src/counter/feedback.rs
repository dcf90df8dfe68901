use std::fmt;

use super::repetition::{Step, Transition};

/// 利用者に表示する状態メッセージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    RepCounted(u32),
    HoldLonger,
    TooFast,
    AdjustPosture,
    HoldDescent,
    ReturnToTop,
    // 以下はフレーム判定の外で使う
    Calibrating,
    Calibrated,
    CalibrationFailed,
    NoPerson,
    ShouldersNotVisible,
    Stopped,
    CountReset,
}

impl Feedback {
    /// フレームの判定結果からメッセージを選ぶ
    ///
    /// 優先順: カウント成立 > どちらも未検出 > 下を検出 > 上を検出。
    /// 保持時間・間隔ゲートの失敗は上に戻る経路でのみ表示する。
    pub fn classify(step: &Step) -> Self {
        if let Transition::Counted(count) = step.transition {
            return Feedback::RepCounted(count);
        }
        if !step.down_detected && !step.up_detected {
            return Feedback::AdjustPosture;
        }
        if step.down_detected {
            return Feedback::HoldDescent;
        }
        match step.transition {
            Transition::HeldTooShort { .. } => Feedback::HoldLonger,
            Transition::TooFast { .. } => Feedback::TooFast,
            _ => Feedback::ReturnToTop,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Feedback::RepCounted(count) => format!("Nice! Reps: {}", count),
            Feedback::HoldLonger => "Hold the bottom position a little longer.".to_string(),
            Feedback::TooFast => "Too fast. Slow down between reps.".to_string(),
            Feedback::AdjustPosture => "Keep hands under shoulders and lower your chest.".to_string(),
            Feedback::HoldDescent => "Good depth, hold...".to_string(),
            Feedback::ReturnToTop => "Push back up to the top.".to_string(),
            Feedback::Calibrating => "Calibrating... hold the top position.".to_string(),
            Feedback::Calibrated => "Calibrated. Start push-ups.".to_string(),
            Feedback::CalibrationFailed => {
                "Calibration failed. Make sure your full upper body is visible and try again.".to_string()
            }
            Feedback::NoPerson => "No person detected.".to_string(),
            Feedback::ShouldersNotVisible => "Adjust posture so your shoulders are visible.".to_string(),
            Feedback::Stopped => "Detection stopped.".to_string(),
            Feedback::CountReset => "Count reset.".to_string(),
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
