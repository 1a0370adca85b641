pub mod settings;

pub use settings::{ActiveCameras, IntervalUnit, JobSettings, NamingKind};
