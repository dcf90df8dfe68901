use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::pose::{Pose, PoseSource};

use super::calibration::{Baseline, CalibrationError, Calibrator};
use super::feedback::Feedback;
use super::posture::{PostureEvaluator, Signals};
use super::repetition::{RepetitionRules, RepetitionSession, Step};
use super::sink::{Status, StatusSink};

/// 1フレームの処理結果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub signals: Option<Signals>,
    pub step: Option<Step>,
    pub feedback: Feedback,
}

/// キャリブレーションとフレームごとのレップ判定をまとめる
///
/// 基準姿勢とセッション状態はこの構造体だけが持つ。1フレームの評価は
/// 最後まで走りきり、停止は次のフレームから効く。
pub struct Detector<S: StatusSink> {
    calibrator: Calibrator,
    evaluator: PostureEvaluator,
    rules: RepetitionRules,
    baseline: Option<Baseline>,
    session: RepetitionSession,
    running: bool,
    sink: S,
}

impl<S: StatusSink> Detector<S> {
    pub fn new(config: &Config, sink: S) -> Self {
        Self {
            calibrator: Calibrator::new(&config.calibration, config.posture.keypoint_confidence),
            evaluator: PostureEvaluator::from_config(&config.posture),
            rules: RepetitionRules::from_config(&config.repetition),
            baseline: None,
            session: RepetitionSession::new(),
            running: false,
            sink,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn count(&self) -> u32 {
        self.session.count
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn session(&self) -> &RepetitionSession {
        &self.session
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn status(&self, feedback: Feedback) -> Status {
        Status {
            count: self.session.count,
            running: self.running,
            calibrated: self.baseline.is_some(),
            position: self.session.position,
            message: feedback.message(),
        }
    }

    fn publish(&mut self, feedback: Feedback) {
        let status = self.status(feedback);
        self.sink.publish(&status);
    }

    /// 検出開始: キャリブレーションしてから判定を始める
    pub async fn start<P: PoseSource + ?Sized>(&mut self, source: &mut P) -> Result<Baseline, CalibrationError> {
        self.begin_calibration();
        let result = self.calibrator.calibrate(source).await;
        self.finish_calibration(result)
    }

    /// 前回の基準姿勢を捨ててキャリブレーション中の状態にする
    pub fn begin_calibration(&mut self) {
        self.running = false;
        self.baseline = None;
        self.session.reset_position();
        self.publish(Feedback::Calibrating);
    }

    pub fn finish_calibration(
        &mut self,
        result: Result<Baseline, CalibrationError>,
    ) -> Result<Baseline, CalibrationError> {
        match result {
            Ok(baseline) => {
                self.baseline = Some(baseline);
                self.running = true;
                self.publish(Feedback::Calibrated);
                Ok(baseline)
            }
            Err(e) => {
                self.baseline = None;
                self.running = false;
                self.publish(Feedback::CalibrationFailed);
                Err(e)
            }
        }
    }

    /// 検出停止: 基準姿勢を破棄し位置を Up に戻す。カウントは残す
    pub fn stop(&mut self) {
        self.running = false;
        self.baseline = None;
        self.session.reset_position();
        self.publish(Feedback::Stopped);
    }

    /// カウントだけを 0 に戻す
    pub fn reset_count(&mut self) {
        self.session.reset_count();
        self.publish(Feedback::CountReset);
    }

    /// 1フレーム処理する。検出中でなければ何もしない
    pub fn process_frame(&mut self, poses: &[Pose], now: Duration) -> Option<FrameReport> {
        if !self.running {
            return None;
        }
        let baseline = self.baseline?;

        let pose = poses.first();
        self.sink.keypoints(pose);

        let Some(pose) = pose else {
            self.publish(Feedback::NoPerson);
            return Some(FrameReport { signals: None, step: None, feedback: Feedback::NoPerson });
        };

        let Some(signals) = self.evaluator.evaluate(pose, &baseline) else {
            self.publish(Feedback::ShouldersNotVisible);
            return Some(FrameReport {
                signals: None,
                step: None,
                feedback: Feedback::ShouldersNotVisible,
            });
        };
        debug!(
            confidence = pose.average_confidence(),
            elbow_angle = signals.elbow_angle,
            shoulder_drop = signals.shoulder_drop,
            wrists_under = signals.wrists_under,
            "signals"
        );

        let step = self.rules.step(&mut self.session, &signals, &baseline, now);
        let feedback = Feedback::classify(&step);
        self.publish(feedback);

        Some(FrameReport { signals: Some(signals), step: Some(step), feedback })
    }

    /// ソースから1回取得して処理する。ソースのエラーはログに出してフレームを飛ばす
    pub fn poll<P: PoseSource + ?Sized>(&mut self, source: &mut P, now: Duration) -> Option<FrameReport> {
        match source.estimate() {
            Ok(poses) => self.process_frame(&poses, now),
            Err(e) => {
                warn!("pose source failed: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::repetition::{Position, Transition};
    use crate::pose::{Keypoint, KeypointIndex};
    use anyhow::anyhow;

    /// 肩 (100, y) / (200, y)、腰 y=300。bent なら肘を約60°に曲げる
    fn make_pose(shoulder_y: f32, bent: bool) -> Pose {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        keypoints[KeypointIndex::LeftHip as usize] = Keypoint::new(100.0, 300.0, 0.9);
        keypoints[KeypointIndex::RightHip as usize] = Keypoint::new(200.0, 300.0, 0.9);
        for (sx, s, e, w) in [
            (100.0, KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow, KeypointIndex::LeftWrist),
            (200.0, KeypointIndex::RightShoulder, KeypointIndex::RightElbow, KeypointIndex::RightWrist),
        ] {
            keypoints[s as usize] = Keypoint::new(sx, shoulder_y, 0.9);
            keypoints[e as usize] = Keypoint::new(sx, shoulder_y + 50.0, 0.9);
            keypoints[w as usize] = if bent {
                Keypoint::new(sx + 50.0, shoulder_y + 20.0, 0.9)
            } else {
                Keypoint::new(sx, shoulder_y + 100.0, 0.9)
            };
        }
        Pose::new(keypoints)
    }

    fn top() -> Pose {
        make_pose(100.0, false)
    }

    fn bottom() -> Pose {
        make_pose(140.0, true)
    }

    struct FixedSource(Vec<Pose>);

    impl PoseSource for FixedSource {
        fn estimate(&mut self) -> anyhow::Result<Vec<Pose>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl PoseSource for FailingSource {
        fn estimate(&mut self) -> anyhow::Result<Vec<Pose>> {
            Err(anyhow!("camera unplugged"))
        }
    }

    async fn calibrated() -> Detector<Vec<Status>> {
        let mut detector = Detector::new(&Config::default(), Vec::new());
        detector.start(&mut FixedSource(vec![top()])).await.unwrap();
        detector
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_calibrates_and_runs() {
        let detector = calibrated().await;
        assert!(detector.is_running());
        let baseline = detector.baseline().unwrap();
        assert_eq!(baseline.shoulder_y, 100.0);
        assert_eq!(baseline.body_height, 200.0);

        let messages: Vec<&str> = detector.sink().iter().map(|s| s.message.as_str()).collect();
        assert_eq!(messages, vec![Feedback::Calibrating.message(), Feedback::Calibrated.message()]);
        assert!(detector.sink()[1].calibrated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_calibration_does_not_start() {
        let mut detector = Detector::new(&Config::default(), Vec::new());
        let result = detector.start(&mut FixedSource(Vec::new())).await;
        assert!(matches!(result, Err(CalibrationError::NoReliablePose { .. })));
        assert!(!detector.is_running());
        assert!(!detector.is_calibrated());
        assert_eq!(detector.sink().last().map(|s| s.message.clone()), Some(Feedback::CalibrationFailed.message()));
        assert!(detector.process_frame(&[top()], ms(0)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_repetition() {
        let mut detector = calibrated().await;

        let report = detector.process_frame(&[bottom()], ms(0)).unwrap();
        assert_eq!(report.feedback, Feedback::HoldDescent);
        assert_eq!(report.step.map(|s| s.transition), Some(Transition::Descended));

        let report = detector.process_frame(&[top()], ms(300)).unwrap();
        assert_eq!(report.feedback, Feedback::RepCounted(1));
        assert_eq!(detector.count(), 1);
        assert_eq!(detector.sink().last().map(|s| s.message.clone()), Some("Nice! Reps: 1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_bounce_is_not_counted() {
        let mut detector = calibrated().await;
        detector.process_frame(&[bottom()], ms(0));
        let report = detector.process_frame(&[top()], ms(100)).unwrap();
        assert_eq!(report.feedback, Feedback::HoldLonger);
        assert_eq!(detector.count(), 0);
        assert_eq!(detector.session().position, Position::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_frames_are_skipped() {
        let mut detector = calibrated().await;

        let report = detector.process_frame(&[], ms(0)).unwrap();
        assert_eq!(report.feedback, Feedback::NoPerson);

        let mut hidden = bottom();
        hidden.keypoints[KeypointIndex::LeftShoulder as usize].confidence = 0.1;
        let report = detector.process_frame(&[hidden], ms(10)).unwrap();
        assert_eq!(report.feedback, Feedback::ShouldersNotVisible);
        assert!(report.step.is_none());
        assert_eq!(detector.session().position, Position::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_skips_frame() {
        let mut detector = calibrated().await;
        let published = detector.sink().len();
        assert!(detector.poll(&mut FailingSource, ms(0)).is_none());
        assert_eq!(detector.sink().len(), published);
        assert!(detector.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_baseline_keeps_count() {
        let mut detector = calibrated().await;
        detector.process_frame(&[bottom()], ms(0));
        detector.process_frame(&[top()], ms(300));
        detector.process_frame(&[bottom()], ms(1200));
        assert_eq!(detector.session().position, Position::Down);

        detector.stop();
        assert!(!detector.is_running());
        assert!(detector.baseline().is_none());
        assert_eq!(detector.count(), 1);
        assert_eq!(detector.session().position, Position::Up);
        assert!(detector.process_frame(&[top()], ms(2000)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_count_keeps_baseline() {
        let mut detector = calibrated().await;
        detector.process_frame(&[bottom()], ms(0));
        detector.process_frame(&[top()], ms(300));
        let baseline = *detector.baseline().unwrap();

        detector.reset_count();
        assert_eq!(detector.count(), 0);
        assert_eq!(detector.baseline(), Some(&baseline));
        assert!(detector.is_running());

        // 停止中でもリセットできる
        detector.stop();
        detector.reset_count();
        assert_eq!(detector.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_recalibrates() {
        let mut detector = calibrated().await;
        detector.stop();
        detector.start(&mut FixedSource(vec![make_pose(120.0, false)])).await.unwrap();
        assert_eq!(detector.baseline().map(|b| b.shoulder_y), Some(120.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_demo_recording() {
        let recording = crate::pose::Recording::parse(std::io::Cursor::new(include_str!(
            "../../demos/pushups.jsonl"
        )))
        .unwrap();
        let mut source = crate::pose::ReplaySource::new(recording);
        let mut detector = Detector::new(&Config::default(), Vec::new());
        detector.start(&mut source).await.unwrap();

        while let Some(frame) = source.next_frame() {
            detector.process_frame(&frame.poses(), frame.timestamp);
        }
        assert_eq!(detector.count(), 3);
        assert_eq!(detector.sink().last().map(|s| s.message.clone()), Some(Feedback::NoPerson.message()));
    }
}
