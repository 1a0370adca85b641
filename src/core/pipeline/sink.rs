//! 输出写入

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageOutputFormat, RgbImage};
use log::{debug, warn};

use crate::core::error::Result;
use crate::core::metadata::MetadataWriter;
use crate::core::naming::{OutputFormat, OutputNames};
use crate::core::telemetry::TelemetrySample;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// 一个视角的写入请求
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub frame_index: u64,
    pub camera: String,
    pub names: OutputNames,
    pub image: RgbImage,
    pub mask: Option<GrayImage>,
    pub geolocation: Option<TelemetrySample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub mask_written: bool,
    pub geotagged: bool,
    pub metadata_failed: bool,
}

pub trait OutputSink {
    fn write(&mut self, request: WriteRequest) -> Result<WriteReport>;
}

/// 写入 `<output_root>/<video_stem>_processed/`
pub struct DiskSink {
    dir: PathBuf,
    format: OutputFormat,
    jpeg_quality: u8,
    metadata: Option<Box<dyn MetadataWriter>>,
}

impl DiskSink {
    pub fn new(output_root: &Path, video_stem: &str, format: OutputFormat) -> Self {
        Self {
            dir: output_root.join(format!("{}_processed", video_stem)),
            format,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            metadata: None,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_metadata_writer(mut self, writer: Box<dyn MetadataWriter>) -> Self {
        self.metadata = Some(writer);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prepare(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    fn encode_image(&self, image: &RgbImage, path: &Path) -> Result<()> {
        let format = match self.format {
            OutputFormat::Jpg => ImageOutputFormat::Jpeg(self.jpeg_quality),
            OutputFormat::Png => ImageOutputFormat::Png,
            OutputFormat::Tiff => ImageOutputFormat::Tiff,
        };
        let mut writer = BufWriter::new(File::create(path)?);
        image.write_to(&mut writer, format)?;
        writer.flush()?;
        Ok(())
    }
}

impl OutputSink for DiskSink {
    fn write(&mut self, request: WriteRequest) -> Result<WriteReport> {
        let mut report = WriteReport::default();

        let image_path = self.prepare(&request.names.image)?;
        self.encode_image(&request.image, &image_path)?;
        debug!("wrote {}", image_path.display());

        if let Some(mask) = &request.mask {
            let mask_path = self.prepare(&request.names.mask)?;
            let mut writer = BufWriter::new(File::create(&mask_path)?);
            mask.write_to(&mut writer, ImageOutputFormat::Png)?;
            writer.flush()?;
            report.mask_written = true;
        }

        if let (Some(sample), Some(writer)) = (&request.geolocation, &self.metadata) {
            match writer.write_gps(&image_path, sample) {
                Ok(()) => report.geotagged = true,
                Err(e) => {
                    warn!("GPS not embedded in {}: {}", image_path.display(), e);
                    report.metadata_failed = true;
                }
            }
        }

        Ok(report)
    }
}

/// 内存收集（测试与嵌入调用）
#[derive(Default)]
pub struct MemorySink {
    pub requests: Vec<WriteRequest>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_names(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.names.image.as_str()).collect()
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, request: WriteRequest) -> Result<WriteReport> {
        let report = WriteReport {
            mask_written: request.mask.is_some(),
            geotagged: request.geolocation.is_some(),
            metadata_failed: false,
        };
        self.requests.push(request);
        Ok(report)
    }
}
