//! 输出文件命名
//!
//! Names depend only on (video stem, frame index, camera name, mode, format),
//! so reruns over the same video overwrite the same files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::ExtractError;

pub const DEFAULT_IMAGE_PATTERN: &str = "{filename}_frame{frame}_{camera}";
pub const DEFAULT_MASK_PATTERN: &str = "{filename}_frame{frame}_{camera}_mask";

/// 输出图像格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpg,
    Png,
    Tiff,
}

impl OutputFormat {
    /// 带点的扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => ".jpg",
            OutputFormat::Png => ".png",
            OutputFormat::Tiff => ".tif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            "tif" | "tiff" => Ok(OutputFormat::Tiff),
            other => Err(ExtractError::Config(format!("unknown output format '{}'", other))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension()[1..])
    }
}

/// 命名模式
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamingMode {
    /// `<stem>_frame000042_front.jpg` + `<image>.mask.png`
    #[default]
    RealityScan,
    /// `<stem>_frame000042_front.jpg` + `<stem>_frame000042_front_mask.png`
    Simple,
    /// 占位符 `{filename}` `{frame}` `{camera}` `{ext}`，掩码模板还可用 `{image_name}`
    Custom {
        image_pattern: String,
        mask_pattern: String,
    },
}

impl NamingMode {
    pub fn custom(image_pattern: impl Into<String>, mask_pattern: impl Into<String>) -> Self {
        NamingMode::Custom {
            image_pattern: image_pattern.into(),
            mask_pattern: mask_pattern.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub image: String,
    pub mask: String,
}

struct Placeholders<'a> {
    filename: &'a str,
    frame: String,
    camera: &'a str,
    ext: &'a str,
    image_name: Option<&'a str>,
}

impl Placeholders<'_> {
    fn fill(&self, pattern: &str) -> String {
        let mut out = pattern
            .replace("{filename}", self.filename)
            .replace("{frame}", &self.frame)
            .replace("{camera}", self.camera)
            .replace("{ext}", self.ext);
        if let Some(image_name) = self.image_name {
            out = out.replace("{image_name}", image_name);
        }
        out
    }
}

/// 生成图像和掩码文件名
pub fn output_names(stem: &str, frame_index: u64, camera: &str, mode: &NamingMode, format: OutputFormat) -> OutputNames {
    let ext = format.extension();
    let base = format!("{}_frame{:06}_{}", stem, frame_index, camera);

    match mode {
        NamingMode::RealityScan => {
            let image = format!("{}{}", base, ext);
            let mask = format!("{}.mask.png", image);
            OutputNames { image, mask }
        }
        NamingMode::Simple => OutputNames {
            image: format!("{}{}", base, ext),
            mask: format!("{}_mask.png", base),
        },
        NamingMode::Custom {
            image_pattern,
            mask_pattern,
        } => {
            let mut ctx = Placeholders {
                filename: stem,
                frame: format!("{:06}", frame_index),
                camera,
                ext,
                image_name: None,
            };

            let mut image = ctx.fill(image_pattern);
            if !image_pattern.contains("{ext}") {
                image.push_str(ext);
            }

            ctx.image_name = Some(&image);
            ctx.ext = ".png";
            let mut mask = ctx.fill(mask_pattern);
            if !mask_pattern.contains("{ext}") {
                mask.push_str(".png");
            }

            OutputNames { image, mask }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realityscan_names() {
        let names = output_names("walk", 42, "front", &NamingMode::RealityScan, OutputFormat::Jpg);
        assert_eq!(names.image, "walk_frame000042_front.jpg");
        assert_eq!(names.mask, "walk_frame000042_front.jpg.mask.png");
    }

    #[test]
    fn test_simple_names() {
        let names = output_names("walk", 7, "view_3", &NamingMode::Simple, OutputFormat::Tiff);
        assert_eq!(names.image, "walk_frame000007_view_3.tif");
        assert_eq!(names.mask, "walk_frame000007_view_3_mask.png");
    }

    #[test]
    fn test_custom_names() {
        let mode = NamingMode::custom(DEFAULT_IMAGE_PATTERN, DEFAULT_MASK_PATTERN);
        let names = output_names("a", 1, "up", &mode, OutputFormat::Png);
        assert_eq!(names.image, "a_frame000001_up.png");
        assert_eq!(names.mask, "a_frame000001_up_mask.png");

        let mode = NamingMode::custom("{camera}/{frame}{ext}", "masks/{image_name}{ext}");
        let names = output_names("a", 12, "left", &mode, OutputFormat::Jpg);
        assert_eq!(names.image, "left/000012.jpg");
        assert_eq!(names.mask, "masks/left/000012.jpg.png");
    }

    #[test]
    fn test_names_are_deterministic() {
        let a = output_names("v", 3, "back", &NamingMode::RealityScan, OutputFormat::Png);
        let b = output_names("v", 3, "back", &NamingMode::RealityScan, OutputFormat::Png);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpg);
        assert_eq!("tiff".parse::<OutputFormat>().unwrap(), OutputFormat::Tiff);
        assert!("webp".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Tiff.to_string(), "tif");
    }
}
