pub mod batch;
pub mod detector;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod projection;
pub mod rig;
pub mod telemetry;
pub mod tools;
pub mod video;

pub use error::{ExtractError, Result};
