pub mod geometry;
pub mod keypoint;
pub mod source;

pub use geometry::{angle_degrees, keypoint_at, midpoint_y, KEYPOINT_CONFIDENCE};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
pub use source::{LatestFrameSource, PoseSource, RecordedFrame, Recording, RecordingError, ReplaySource};
