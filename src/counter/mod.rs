pub mod calibration;
pub mod detector;
pub mod feedback;
pub mod posture;
pub mod repetition;
pub mod sink;

pub use calibration::{Baseline, CalibrationError, CalibrationSample, Calibrator};
pub use detector::{Detector, FrameReport};
pub use feedback::Feedback;
pub use posture::{PostureEvaluator, Signals};
pub use repetition::{Position, RepetitionRules, RepetitionSession, Step, Transition};
pub use sink::{LogSink, Status, StatusSink};
