pub mod blur_gate;
pub mod decision;
pub mod decode;
pub mod frame;
pub mod motion_gate;
pub mod probe;

pub use blur_gate::{BlurGate, BlurGateConfig};
pub use decision::{DecisionReason, ExtractionDecision};
pub use decode::{FfmpegFrameSource, FrameSource, MemoryFrameSource};
pub use frame::{Frame, ProjectedFrame, VideoInfo};
pub use motion_gate::{MotionGate, MotionGateConfig};
