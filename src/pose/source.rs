//! 姿勢ソース
//!
//! 推論バックエンドやカメラは外部にあり、ここではフレームごとに 0 または 1 個の
//! Pose を返すインターフェースだけを扱う。

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;

use super::keypoint::{Keypoint, Pose};

/// 姿勢推定の呼び出し口
///
/// 何度呼んでも安価であること。内部エラーは `Err` で返してよいが、
/// 呼び出し側はそのフレームを飛ばすだけで処理を続ける。
pub trait PoseSource {
    fn estimate(&mut self) -> Result<Vec<Pose>>;
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid timestamp at line {line}: {timestamp_ms} ms")]
    InvalidTimestamp { line: usize, timestamp_ms: f64 },
}

/// 記録ファイル中のキーポイント表現
///
/// `{"x":..,"y":..,"score":..}` / `[x, y, confidence]` / `[x, y]` を受け付ける
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeypoint {
    Object {
        x: f32,
        y: f32,
        #[serde(default, alias = "confidence")]
        score: Option<f32>,
    },
    Full(f32, f32, Option<f32>),
    Xy(f32, f32),
}

impl From<RawKeypoint> for Keypoint {
    fn from(raw: RawKeypoint) -> Self {
        match raw {
            RawKeypoint::Object { x, y, score } => Keypoint::from_parts(x, y, score),
            RawKeypoint::Full(x, y, c) => Keypoint::from_parts(x, y, c),
            RawKeypoint::Xy(x, y) => Keypoint::from_parts(x, y, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    timestamp_ms: f64,
    #[serde(default)]
    keypoints: Option<Vec<RawKeypoint>>,
}

/// 記録済みの1フレーム
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub timestamp: Duration,
    pub pose: Option<Pose>,
}

impl RecordedFrame {
    pub fn poses(&self) -> Vec<Pose> {
        self.pose.iter().cloned().collect()
    }

    /// 送信用のマイクロ秒タイムスタンプ。u64 に収まらなければ u64::MAX
    pub fn timestamp_us(&self) -> u64 {
        u64::try_from(self.timestamp.as_micros()).unwrap_or(u64::MAX)
    }
}

/// JSON Lines 形式の姿勢記録（1行1フレーム）
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordingError> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    pub fn parse<R: BufRead>(reader: R) -> Result<Self, RecordingError> {
        let mut frames = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawFrame = serde_json::from_str(&line)
                .map_err(|source| RecordingError::Parse { line: i + 1, source })?;
            let pose = match raw.keypoints {
                Some(kps) if !kps.is_empty() => {
                    let keypoints: Vec<Keypoint> = kps.into_iter().map(Keypoint::from).collect();
                    Some(Pose::from_slice(&keypoints))
                }
                _ => None,
            };
            let timestamp = Duration::try_from_secs_f64(raw.timestamp_ms.max(0.0) / 1000.0).map_err(|_| {
                RecordingError::InvalidTimestamp { line: i + 1, timestamp_ms: raw.timestamp_ms }
            })?;
            frames.push(RecordedFrame { timestamp, pose });
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// 記録を先頭から順に返す。尽きた後は空リストを返し続ける
pub struct ReplaySource {
    frames: VecDeque<RecordedFrame>,
    last_timestamp: Duration,
}

impl ReplaySource {
    pub fn new(recording: Recording) -> Self {
        Self {
            frames: recording.frames.into(),
            last_timestamp: Duration::ZERO,
        }
    }

    /// 次のフレームを取り出す（タイムスタンプ付き）
    pub fn next_frame(&mut self) -> Option<RecordedFrame> {
        let frame = self.frames.pop_front()?;
        self.last_timestamp = frame.timestamp;
        Some(frame)
    }

    /// 最後に取り出したフレームのタイムスタンプ
    pub fn last_timestamp(&self) -> Duration {
        self.last_timestamp
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl PoseSource for ReplaySource {
    fn estimate(&mut self) -> Result<Vec<Pose>> {
        Ok(self.next_frame().map(|f| f.poses()).unwrap_or_default())
    }
}

/// watch チャネルに流れてくる最新フレームを読むソース
pub struct LatestFrameSource {
    rx: watch::Receiver<Vec<Pose>>,
}

impl LatestFrameSource {
    pub fn new(rx: watch::Receiver<Vec<Pose>>) -> Self {
        Self { rx }
    }
}

impl PoseSource for LatestFrameSource {
    fn estimate(&mut self) -> Result<Vec<Pose>> {
        Ok(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::KeypointIndex;
    use std::io::Cursor;
    use std::io::Write;

    #[test]
    fn test_parse_mixed_keypoint_forms() {
        let input = r#"
{"timestamp_ms": 0, "keypoints": [[1.0, 2.0, 0.9], [3.0, 4.0], {"x": 5.0, "y": 6.0, "score": 0.4}]}
{"timestamp_ms": 33.5, "keypoints": []}

{"timestamp_ms": 66, "keypoints": null}
{"timestamp_ms": 100}
"#;
        let rec = Recording::parse(Cursor::new(input)).unwrap();
        assert_eq!(rec.len(), 4);

        let pose = rec.frames[0].pose.as_ref().unwrap();
        assert_eq!(pose.get(KeypointIndex::Nose).confidence, 0.9);
        assert_eq!(pose.get(KeypointIndex::LeftEye).confidence, 0.0);
        assert_eq!(pose.get(KeypointIndex::RightEye).y, 6.0);
        assert_eq!(pose.get(KeypointIndex::RightEye).confidence, 0.4);
        assert_eq!(pose.get(KeypointIndex::RightAnkle).confidence, 0.0);

        assert_eq!(rec.frames[1].timestamp, Duration::from_micros(33_500));
        assert!(rec.frames[1].pose.is_none());
        assert!(rec.frames[2].pose.is_none());
        assert!(rec.frames[3].pose.is_none());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let input = "{\"timestamp_ms\": 0}\nnot json\n";
        match Recording::parse(Cursor::new(input)) {
            Err(RecordingError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_timestamp_is_an_error() {
        let input = "{\"timestamp_ms\": 0}\n{\"timestamp_ms\": 1e300, \"keypoints\": null}\n";
        match Recording::parse(Cursor::new(input)) {
            Err(RecordingError::InvalidTimestamp { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_us_saturates() {
        let frame = RecordedFrame { timestamp: Duration::from_millis(1500), pose: None };
        assert_eq!(frame.timestamp_us(), 1_500_000);
        let frame = RecordedFrame { timestamp: Duration::MAX, pose: None };
        assert_eq!(frame.timestamp_us(), u64::MAX);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"timestamp_ms\": 10, \"keypoints\": [[1, 1, 1]]}}").unwrap();
        let rec = Recording::load(file.path()).unwrap();
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.frames[0].timestamp, Duration::from_millis(10));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Recording::load("/nonexistent/recording.jsonl"),
            Err(RecordingError::Io(_))
        ));
    }

    #[test]
    fn test_replay_source_exhaustion() {
        let rec = Recording {
            frames: vec![
                RecordedFrame { timestamp: Duration::ZERO, pose: Some(Pose::default()) },
                RecordedFrame { timestamp: Duration::from_millis(33), pose: None },
            ],
        };
        let mut src = ReplaySource::new(rec);
        assert_eq!(src.estimate().unwrap().len(), 1);
        assert_eq!(src.estimate().unwrap().len(), 0);
        assert_eq!(src.last_timestamp(), Duration::from_millis(33));
        for _ in 0..10 {
            assert!(src.estimate().unwrap().is_empty());
        }
        assert_eq!(src.remaining(), 0);
    }

    #[test]
    fn test_latest_frame_source() {
        let (tx, rx) = watch::channel(Vec::new());
        let mut src = LatestFrameSource::new(rx);
        assert!(src.estimate().unwrap().is_empty());
        tx.send_replace(vec![Pose::default()]);
        assert_eq!(src.estimate().unwrap().len(), 1);
        // 新しいフレームが無ければ同じものを返す
        assert_eq!(src.estimate().unwrap().len(), 1);
    }
}
