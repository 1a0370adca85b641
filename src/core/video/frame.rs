use std::time::Duration;

use image::{GrayImage, ImageBuffer, Rgb, RgbImage};

use crate::core::error::{ExtractError, Result};

/// 帧数据结构（等距柱状全景，RGB24）
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGB 格式
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_ms: u64, frame_number: u64) -> Self {
        Self {
            width,
            height,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    pub fn from_image(image: RgbImage, timestamp: Duration, frame_number: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            timestamp,
            frame_number,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp.as_secs_f64()
    }

    /// 校验尺寸与缓冲区长度
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "frame {} has zero size {}x{}",
                self.frame_number, self.width, self.height
            )));
        }
        if self.data.len() != self.pixel_count() * 3 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "frame {} buffer is {} bytes, expected {}",
                self.frame_number,
                self.data.len(),
                self.pixel_count() * 3
            )));
        }
        Ok(())
    }

    pub fn view(&self) -> Result<ImageBuffer<Rgb<u8>, &[u8]>> {
        self.validate()?;
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()).ok_or_else(|| {
            ExtractError::InvalidFrameGeometry(format!("frame {} buffer mismatch", self.frame_number))
        })
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        self.validate()?;
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            ExtractError::InvalidFrameGeometry(format!("frame {} buffer mismatch", self.frame_number))
        })
    }

    pub fn resize_to(&self, target_width: u32, target_height: u32) -> Result<RgbImage> {
        let view = self.view()?;
        if (self.width, self.height) == (target_width, target_height) {
            return self.to_image();
        }
        Ok(image::imageops::resize(
            &view,
            target_width,
            target_height,
            image::imageops::FilterType::Triangle,
        ))
    }
}

/// RGB → 灰度（整数权重，与亮度公式一致）
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let data = image
        .as_raw()
        .chunks_exact(3)
        .map(|rgb| ((rgb[0] as u32 * 299 + rgb[1] as u32 * 587 + rgb[2] as u32 * 114) / 1000) as u8)
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

/// 单个虚拟相机的投影结果
#[derive(Debug, Clone)]
pub struct ProjectedFrame {
    pub camera: String,
    pub pixels: RgbImage,
    pub source_timestamp: Duration,
    pub frame_index: u64,
}

/// 视频流元数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: Option<u64>,
    pub duration: Option<f64>,
}

impl VideoInfo {
    /// 总帧数；容器未给出时按时长估算
    pub fn estimated_frames(&self) -> u64 {
        match (self.frame_count, self.duration) {
            (Some(n), _) => n,
            (None, Some(d)) if self.fps > 0.0 => (d * self.fps).round() as u64,
            _ => 0,
        }
    }
}
