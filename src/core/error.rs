use thiserror::Error;

use crate::core::telemetry::TelemetryKind;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid rig config: {0}")]
    InvalidRigConfig(String),
    #[error("Invalid frame geometry: {0}")]
    InvalidFrameGeometry(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("No telemetry available")]
    NoTelemetryAvailable,
    #[error("Telemetry parse error ({source_kind}): {reason}")]
    TelemetryParse {
        source_kind: TelemetryKind,
        reason: String,
    },
    #[error("Metadata write failed: {0}")]
    Metadata(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    pub fn telemetry(kind: TelemetryKind, reason: impl Into<String>) -> Self {
        ExtractError::TelemetryParse {
            source_kind: kind,
            reason: reason.into(),
        }
    }

    /// 是否为单个视频的致命错误（批处理中只终止当前视频）
    pub fn is_job_fatal(&self) -> bool {
        !matches!(
            self,
            ExtractError::NoTelemetryAvailable
                | ExtractError::TelemetryParse { .. }
                | ExtractError::Metadata(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(ExtractError::Decode("eof".into()).is_job_fatal());
        assert!(ExtractError::InvalidRigConfig("count".into()).is_job_fatal());
        assert!(!ExtractError::NoTelemetryAvailable.is_job_fatal());
        assert!(!ExtractError::telemetry(TelemetryKind::Camm, "short").is_job_fatal());
        assert!(!ExtractError::Metadata("exiftool".into()).is_job_fatal());
    }

    #[test]
    fn test_display() {
        let e = ExtractError::telemetry(TelemetryKind::Gpx, "no points");
        assert_eq!(e.to_string(), "Telemetry parse error (gpx): no points");
    }
}
