//! 上下2状態のレップ判定
//!
//! 肘角度と肩の沈み込みにそれぞれ上下で異なる閾値を持たせたヒステリシス帯と、
//! 下の保持時間・レップ間隔のゲートでジッタによる誤カウントを防ぐ。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RepetitionConfig;

use super::calibration::Baseline;
use super::posture::Signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    #[default]
    Up,
    Down,
}

/// レップ判定の状態。フレーム評価と明示的なリセットでのみ変化する
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepetitionSession {
    pub position: Position,
    /// 直前にカウントした時刻。まだ1回もカウントしていなければ None
    pub last_rep: Option<Duration>,
    /// 下に入った時刻
    pub last_down: Duration,
    pub count: u32,
}

impl RepetitionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// カウントだけを 0 に戻す
    pub fn reset_count(&mut self) {
        self.count = 0;
    }

    /// 検出停止時: 位置を Up に戻す（カウントは保持）
    pub fn reset_position(&mut self) {
        self.position = Position::Up;
    }
}

/// 1フレームの遷移結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Up → Down
    Descended,
    /// Down → Up でカウント
    Counted(u32),
    /// 上に戻ったが下の保持時間が足りない（Down のまま）
    HeldTooShort { held: Duration },
    /// 上に戻ったが前回のレップから間隔が短すぎる（Down のまま）
    TooFast { since_last: Duration },
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub down_detected: bool,
    pub up_detected: bool,
    pub transition: Transition,
}

pub struct RepetitionRules {
    down_elbow_angle: f32,
    up_elbow_angle: f32,
    down_drop_fraction: f32,
    up_drop_fraction: f32,
    min_hold: Duration,
    min_rep_interval: Duration,
}

impl RepetitionRules {
    pub fn from_config(config: &RepetitionConfig) -> Self {
        Self {
            down_elbow_angle: config.down_elbow_angle,
            up_elbow_angle: config.up_elbow_angle,
            down_drop_fraction: config.down_drop_fraction,
            up_drop_fraction: config.up_drop_fraction,
            min_hold: Duration::from_millis(config.min_hold_ms),
            min_rep_interval: Duration::from_millis(config.min_rep_interval_ms),
        }
    }

    pub fn down_detected(&self, signals: &Signals, baseline: &Baseline) -> bool {
        signals.elbow_angle < self.down_elbow_angle
            && signals.shoulder_drop > self.down_drop_fraction * baseline.shoulder_drop_threshold
            && signals.wrists_under
    }

    pub fn up_detected(&self, signals: &Signals, baseline: &Baseline) -> bool {
        signals.elbow_angle > self.up_elbow_angle
            && signals.shoulder_drop < self.up_drop_fraction * baseline.shoulder_drop_threshold
    }

    /// 1フレーム分セッションを進める
    pub fn step(
        &self,
        session: &mut RepetitionSession,
        signals: &Signals,
        baseline: &Baseline,
        now: Duration,
    ) -> Step {
        let down_detected = self.down_detected(signals, baseline);
        let up_detected = self.up_detected(signals, baseline);

        let transition = match session.position {
            Position::Up if down_detected => {
                session.position = Position::Down;
                session.last_down = now;
                debug!(?now, "down");
                Transition::Descended
            }
            Position::Down if up_detected => {
                let held = now.saturating_sub(session.last_down);
                let since_last = session.last_rep.map(|t| now.saturating_sub(t));

                if held < self.min_hold {
                    debug!(?held, "up rejected: hold too short");
                    Transition::HeldTooShort { held }
                } else if let Some(since_last) = since_last.filter(|d| *d < self.min_rep_interval) {
                    debug!(?since_last, "up rejected: too fast");
                    Transition::TooFast { since_last }
                } else {
                    session.count += 1;
                    session.last_rep = Some(now);
                    session.position = Position::Up;
                    info!(count = session.count, ?held, "rep counted");
                    Transition::Counted(session.count)
                }
            }
            _ => Transition::Unchanged,
        };

        Step { down_detected, up_detected, transition }
    }
}
