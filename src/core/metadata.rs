//! EXIF GPS 写入

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::core::error::{ExtractError, Result};
use crate::core::telemetry::TelemetrySample;
use crate::core::tools;

/// Embeds geolocation into an already written image.
pub trait MetadataWriter: Send + Sync {
    fn write_gps(&self, image: &Path, sample: &TelemetrySample) -> Result<()>;
}

/// exiftool 参数（不含文件路径）
pub fn gps_args(sample: &TelemetrySample) -> Vec<String> {
    let lat_ref = if sample.latitude >= 0.0 { "N" } else { "S" };
    let lon_ref = if sample.longitude >= 0.0 { "E" } else { "W" };

    let mut args = vec![
        "-overwrite_original".to_string(),
        format!("-GPSLatitude={:.8}", sample.latitude.abs()),
        format!("-GPSLatitudeRef={}", lat_ref),
        format!("-GPSLongitude={:.8}", sample.longitude.abs()),
        format!("-GPSLongitudeRef={}", lon_ref),
    ];

    let altitude = sample.altitude.unwrap_or(0.0);
    args.push(format!("-GPSAltitude={:.3}", altitude.abs()));
    // 0 = above sea level
    args.push(format!("-GPSAltitudeRef={}", if altitude < 0.0 { 1 } else { 0 }));
    args
}

pub struct ExiftoolWriter {
    program: PathBuf,
}

impl ExiftoolWriter {
    pub fn new() -> Self {
        Self::with_program(tools::exiftool_path())
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        tools::is_available(&self.program, "-ver")
    }
}

impl Default for ExiftoolWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataWriter for ExiftoolWriter {
    fn write_gps(&self, image: &Path, sample: &TelemetrySample) -> Result<()> {
        let output = Command::new(&self.program)
            .args(gps_args(sample))
            .arg(image)
            .output()
            .map_err(|e| ExtractError::Metadata(format!("failed to run exiftool: {}", e)))?;

        if !output.status.success() {
            return Err(ExtractError::Metadata(format!(
                "exiftool failed on {}: {}",
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(
            "GPS {:.6},{:.6} -> {}",
            sample.latitude,
            sample.longitude,
            image.display()
        );
        Ok(())
    }
}
