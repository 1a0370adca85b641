//! 主体检测协作方（操作员 / 行人遮罩）
//!
//! The model itself lives outside this crate. The pipeline only sees the
//! [`SubjectDetector`] trait.

use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::core::error::ExtractError;
use crate::core::video::ProjectedFrame;

/// AI 处理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    #[default]
    #[serde(alias = "None")]
    None,
    /// 检测到主体时丢弃该视角
    #[serde(alias = "Skip Frame")]
    SkipFrame,
    /// 输出遮罩：0 = 忽略（主体），255 = 保留
    #[serde(alias = "Generate Mask")]
    GenerateMask,
}

impl FromStr for AiMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "none" | "off" => Ok(AiMode::None),
            "skipframe" | "skip" => Ok(AiMode::SkipFrame),
            "generatemask" | "mask" => Ok(AiMode::GenerateMask),
            _ => Err(ExtractError::Config(format!("unknown AI mode '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    None,
    Mask(GrayImage),
    Skip,
}

pub trait SubjectDetector: Send + Sync {
    fn detect(&self, view: &ProjectedFrame, mode: AiMode) -> DetectionOutcome;
}

/// 全白遮罩（全部保留）
pub fn keep_all_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, image::Luma([255]))
}

type Pattern = Box<dyn Fn(u64, &str) -> bool + Send + Sync>;

/// 测试用检测器：按 (帧号, 相机名) 判定是否有主体
pub struct MockSubjectDetector {
    pattern: Option<Pattern>,
}

impl MockSubjectDetector {
    pub fn new() -> Self {
        Self { pattern: None }
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(u64, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            pattern: Some(Box::new(pattern)),
        }
    }

    pub fn with_fixed_frames(frames: Vec<u64>) -> Self {
        Self::with_pattern(move |frame, _| frames.contains(&frame))
    }

    fn has_subject(&self, view: &ProjectedFrame) -> bool {
        self.pattern
            .as_ref()
            .map(|p| p(view.frame_index, &view.camera))
            .unwrap_or(false)
    }
}

impl Default for MockSubjectDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectDetector for MockSubjectDetector {
    fn detect(&self, view: &ProjectedFrame, mode: AiMode) -> DetectionOutcome {
        let hit = self.has_subject(view);
        match mode {
            AiMode::None => DetectionOutcome::None,
            AiMode::SkipFrame if hit => DetectionOutcome::Skip,
            AiMode::SkipFrame => DetectionOutcome::None,
            AiMode::GenerateMask => {
                let (w, h) = view.pixels.dimensions();
                let mut mask = keep_all_mask(w, h);
                if hit {
                    // 中间一块当作主体
                    for y in h / 4..h * 3 / 4 {
                        for x in w / 4..w * 3 / 4 {
                            mask.put_pixel(x, y, image::Luma([0]));
                        }
                    }
                }
                DetectionOutcome::Mask(mask)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Duration;

    fn view(frame_index: u64, camera: &str) -> ProjectedFrame {
        ProjectedFrame {
            camera: camera.to_string(),
            pixels: RgbImage::new(8, 8),
            source_timestamp: Duration::ZERO,
            frame_index,
        }
    }

    #[test]
    fn test_parse_ai_mode() {
        assert_eq!("Skip Frame".parse::<AiMode>().unwrap(), AiMode::SkipFrame);
        assert_eq!("generate_mask".parse::<AiMode>().unwrap(), AiMode::GenerateMask);
        assert_eq!("None".parse::<AiMode>().unwrap(), AiMode::None);
        assert!("blur".parse::<AiMode>().is_err());
    }

    #[test]
    fn test_mock_skip() {
        let detector = MockSubjectDetector::with_fixed_frames(vec![3]);
        assert_eq!(detector.detect(&view(3, "front"), AiMode::SkipFrame), DetectionOutcome::Skip);
        assert_eq!(detector.detect(&view(4, "front"), AiMode::SkipFrame), DetectionOutcome::None);
        assert_eq!(detector.detect(&view(3, "front"), AiMode::None), DetectionOutcome::None);
    }

    #[test]
    fn test_mock_mask() {
        let detector = MockSubjectDetector::with_pattern(|_, cam| cam == "back");
        let DetectionOutcome::Mask(mask) = detector.detect(&view(0, "back"), AiMode::GenerateMask) else {
            panic!("expected mask");
        };
        assert_eq!(mask.get_pixel(4, 4).0, [0]);
        assert_eq!(mask.get_pixel(0, 0).0, [255]);

        let DetectionOutcome::Mask(mask) = detector.detect(&view(0, "front"), AiMode::GenerateMask) else {
            panic!("expected mask");
        };
        assert!(mask.pixels().all(|p| p.0 == [255]));
    }
}
