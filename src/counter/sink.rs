use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pose::Pose;

use super::repetition::Position;

/// 表示側に渡す状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub count: u32,
    pub running: bool,
    pub calibrated: bool,
    pub position: Position,
    pub message: String,
}

/// 表示層（カウンタ・状態テキスト・骨格オーバーレイ）
///
/// 受け取った値を描画するだけで、ここから判定に影響を与えない。
pub trait StatusSink {
    fn publish(&mut self, status: &Status);

    /// 可視化用の生キーポイント
    fn keypoints(&mut self, _pose: Option<&Pose>) {}
}

impl StatusSink for Vec<Status> {
    fn publish(&mut self, status: &Status) {
        self.push(status.clone());
    }
}

/// メッセージかカウントが変わったときだけログに出す
#[derive(Default)]
pub struct LogSink {
    last: Option<Status>,
    logged: usize,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Status> {
        self.last.as_ref()
    }

    /// ログに出した件数
    pub fn logged(&self) -> usize {
        self.logged
    }

    fn is_change(&self, status: &Status) -> bool {
        match &self.last {
            Some(prev) => {
                prev.message != status.message
                    || prev.count != status.count
                    || prev.running != status.running
                    || prev.calibrated != status.calibrated
            }
            None => true,
        }
    }
}

impl StatusSink for LogSink {
    fn publish(&mut self, status: &Status) {
        if self.is_change(status) {
            self.logged += 1;
            info!(
                count = status.count,
                running = status.running,
                calibrated = status.calibrated,
                "{}",
                status.message
            );
        }
        self.last = Some(status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(count: u32, message: &str) -> Status {
        Status {
            count,
            running: true,
            calibrated: true,
            position: Position::Up,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<Status> = Vec::new();
        sink.publish(&status(0, "a"));
        sink.publish(&status(1, "b"));
        sink.keypoints(None);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].count, 1);
    }

    #[test]
    fn test_log_sink_keeps_last() {
        let mut sink = LogSink::new();
        assert!(sink.last().is_none());
        sink.publish(&status(2, "x"));
        sink.publish(&status(2, "x"));
        assert_eq!(sink.last().map(|s| s.count), Some(2));
    }

    #[test]
    fn test_log_sink_logs_calibration_change() {
        let mut sink = LogSink::new();
        let mut calibrated = status(0, "x");
        calibrated.calibrated = true;
        let mut uncalibrated = calibrated.clone();
        uncalibrated.calibrated = false;

        sink.publish(&calibrated);
        sink.publish(&calibrated);
        assert_eq!(sink.logged(), 1);
        sink.publish(&uncalibrated);
        assert_eq!(sink.logged(), 2);
    }
}
