pub mod extractor;
pub mod models;

pub use extractor::{discover_videos, ExtractorStats, PanoExtractor};
pub use models::JobSettings;
