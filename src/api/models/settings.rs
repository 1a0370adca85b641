use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::detector::AiMode;
use crate::core::error::{ExtractError, Result};
use crate::core::naming::{NamingMode, OutputFormat, DEFAULT_IMAGE_PATTERN, DEFAULT_MASK_PATTERN};
use crate::core::pipeline::{IntervalPolicy, Job, DEFAULT_JPEG_QUALITY, DEFAULT_RESOLUTION};
use crate::core::rig::{LayoutMode, RigConfig, DEFAULT_FOV};
use crate::core::telemetry::TelemetrySetting;
use crate::core::video::blur_gate::DEFAULT_BLUR_THRESHOLD;
use crate::core::video::motion_gate::DEFAULT_MOTION_THRESHOLD;
use crate::core::video::{BlurGateConfig, MotionGateConfig};

pub const MAX_RESOLUTION: u32 = 8192;

/// 间隔单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntervalUnit {
    #[default]
    #[serde(alias = "seconds")]
    Seconds,
    #[serde(alias = "frames")]
    Frames,
}

/// 命名模式（配置文件中的写法）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingKind {
    #[default]
    #[serde(alias = "RealityScan")]
    Realityscan,
    #[serde(alias = "Simple")]
    Simple,
    #[serde(alias = "Custom")]
    Custom,
}

impl std::str::FromStr for NamingKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "realityscan" => Ok(NamingKind::Realityscan),
            "simple" => Ok(NamingKind::Simple),
            "custom" => Ok(NamingKind::Custom),
            other => Err(ExtractError::Config(format!("unknown naming mode '{}'", other))),
        }
    }
}

/// 激活相机：JSON 数组或 "0,1,4" 字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActiveCameras {
    List(Vec<usize>),
    Text(String),
}

impl ActiveCameras {
    pub fn indices(&self) -> Result<Vec<usize>> {
        match self {
            ActiveCameras::List(list) => Ok(list.clone()),
            ActiveCameras::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .map_err(|_| ExtractError::Config(format!("invalid camera index '{}'", s)))
                })
                .collect(),
        }
    }
}

/// 持久化设置 / CLI 配置文件
///
/// 字段名与桌面版设置文件保持一致，缺省值相同。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    /// 输出根目录；为空时写到视频所在目录
    #[serde(alias = "custom_output_dir", alias = "output")]
    pub output_dir: Option<PathBuf>,

    pub resolution: u32,
    pub fov: f64,
    pub camera_count: u32,
    /// 水平视角的俯仰偏移
    pub pitch_offset: f64,
    pub layout_mode: LayoutMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_cameras: Option<ActiveCameras>,

    #[serde(alias = "interval")]
    pub interval_value: f64,
    pub interval_unit: IntervalUnit,

    #[serde(alias = "format")]
    pub output_format: OutputFormat,
    #[serde(alias = "quality")]
    pub jpeg_quality: u8,
    pub naming_mode: NamingKind,
    pub image_pattern: String,
    pub mask_pattern: String,

    pub blur_filter_enabled: bool,
    pub smart_blur_enabled: bool,
    pub blur_threshold: f32,
    pub sharpening_enabled: bool,
    pub sharpening_strength: f32,
    pub adaptive_mode: bool,
    #[serde(alias = "motion_threshold")]
    pub adaptive_threshold: f32,

    pub ai_mode: AiMode,
    /// 旧版开关，等价于 `generate_mask`
    #[serde(skip_serializing)]
    pub ai: bool,

    pub export_telemetry: bool,
    /// 显式指定的 GPX 文件，优先于视频内的遥测
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpx_path: Option<PathBuf>,

    /// 投影线程数，0 表示按 CPU 核数
    pub threads: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            input: None,
            output_dir: None,
            resolution: DEFAULT_RESOLUTION,
            fov: DEFAULT_FOV,
            camera_count: 6,
            pitch_offset: 0.0,
            layout_mode: LayoutMode::Ring,
            active_cameras: None,
            interval_value: 1.0,
            interval_unit: IntervalUnit::Seconds,
            output_format: OutputFormat::Jpg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            naming_mode: NamingKind::Realityscan,
            image_pattern: DEFAULT_IMAGE_PATTERN.to_string(),
            mask_pattern: DEFAULT_MASK_PATTERN.to_string(),
            blur_filter_enabled: false,
            smart_blur_enabled: false,
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            sharpening_enabled: false,
            sharpening_strength: 0.5,
            adaptive_mode: false,
            adaptive_threshold: DEFAULT_MOTION_THRESHOLD,
            ai_mode: AiMode::None,
            ai: false,
            export_telemetry: false,
            gpx_path: None,
            threads: 0,
        }
    }
}

impl JobSettings {
    /// 宽松 JSON（允许注释和尾随逗号）
    pub fn from_json5(text: &str) -> Result<Self> {
        json5::from_str(text).map_err(|e| ExtractError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        json5::from_str(&text).map_err(|e| ExtractError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn effective_ai_mode(&self) -> AiMode {
        if self.ai_mode == AiMode::None && self.ai {
            AiMode::GenerateMask
        } else {
            self.ai_mode
        }
    }

    pub fn interval(&self) -> IntervalPolicy {
        match self.interval_unit {
            IntervalUnit::Seconds => IntervalPolicy::Seconds(self.interval_value),
            IntervalUnit::Frames => IntervalPolicy::Frames(self.interval_value.round().max(0.0) as u32),
        }
    }

    pub fn naming(&self) -> NamingMode {
        match self.naming_mode {
            NamingKind::Realityscan => NamingMode::RealityScan,
            NamingKind::Simple => NamingMode::Simple,
            NamingKind::Custom => NamingMode::custom(&self.image_pattern, &self.mask_pattern),
        }
    }

    pub fn rig(&self) -> Result<RigConfig> {
        let mut rig = RigConfig::new(self.camera_count, self.layout_mode)
            .with_fov(self.fov)
            .with_inclination(self.pitch_offset);
        if let Some(active) = &self.active_cameras {
            rig = rig.with_active_indices(active.indices()?);
        }
        Ok(rig)
    }

    fn validate(&self) -> Result<()> {
        if self.resolution == 0 || self.resolution > MAX_RESOLUTION {
            return Err(ExtractError::Config(format!(
                "resolution {} outside [1, {}]",
                self.resolution, MAX_RESOLUTION
            )));
        }
        if !(self.interval_value.is_finite() && self.interval_value > 0.0) {
            return Err(ExtractError::Config(format!(
                "interval must be positive, got {}",
                self.interval_value
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ExtractError::Config(format!(
                "jpeg quality {} outside [1, 100]",
                self.jpeg_quality
            )));
        }
        if !(0.0..=5.0).contains(&self.sharpening_strength) {
            return Err(ExtractError::Config(format!(
                "sharpening strength {} outside [0, 5]",
                self.sharpening_strength
            )));
        }
        Ok(())
    }

    /// 指定 GPX 时只记录路径，运行时再读取
    fn telemetry(&self) -> TelemetrySetting {
        if !self.export_telemetry {
            return TelemetrySetting::Disabled;
        }
        match &self.gpx_path {
            Some(path) => TelemetrySetting::GpxFile(path.clone()),
            None => TelemetrySetting::FromVideo,
        }
    }

    /// 输出根目录：配置值，否则视频所在目录
    pub fn output_root(&self, video: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => video
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// 校验并生成单个视频的任务
    pub fn to_job(&self, video: &Path) -> Result<Job> {
        self.validate()?;
        let rig = self.rig()?;

        let mut job = Job::new(video, self.output_root(video));
        job.rig = rig;
        job.resolution = self.resolution;
        job.interval = self.interval();
        job.motion = self
            .adaptive_mode
            .then(|| MotionGateConfig::with_threshold(self.adaptive_threshold));
        job.blur = self.blur_filter_enabled.then(|| {
            let config = BlurGateConfig::with_threshold(self.blur_threshold);
            if self.smart_blur_enabled {
                config.smart()
            } else {
                config
            }
        });
        job.sharpen = self.sharpening_enabled.then_some(self.sharpening_strength);
        job.ai_mode = self.effective_ai_mode();
        job.telemetry = self.telemetry();
        job.naming = self.naming();
        job.format = self.output_format;
        job.jpeg_quality = self.jpeg_quality;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = JobSettings::from_json5("{}").unwrap();
        assert_eq!(settings, JobSettings::default());
        assert_eq!(settings.resolution, 2048);
        assert_eq!(settings.fov, 90.0);
        assert_eq!(settings.layout_mode, LayoutMode::Ring);
        assert_eq!(settings.interval(), IntervalPolicy::Seconds(1.0));
        assert_eq!(settings.naming(), NamingMode::RealityScan);
    }

    #[test]
    fn test_desktop_settings_file() {
        let text = r#"{
            // 桌面版导出的设置
            "resolution": 1024,
            "camera_count": 8,
            "layout_mode": "fibonacci",
            "ai_mode": "Skip Frame",
            "interval_value": 10,
            "interval_unit": "Frames",
            "custom_output_dir": "",
            "blur_filter_enabled": true,
            "smart_blur_enabled": true,
            "naming_mode": "custom",
            "image_pattern": "{camera}_{frame}",
            "active_cameras": "0, 3,5",
        }"#;
        let settings = JobSettings::from_json5(text).unwrap();
        assert_eq!(settings.effective_ai_mode(), AiMode::SkipFrame);
        assert_eq!(settings.interval(), IntervalPolicy::Frames(10));

        let job = settings.to_job(Path::new("/data/walk.mp4")).unwrap();
        assert_eq!(job.output_dir, PathBuf::from("/data"));
        assert_eq!(job.resolution, 1024);
        assert_eq!(job.rig.layout, LayoutMode::Fibonacci);
        assert_eq!(job.rig.active_indices.as_ref().unwrap().len(), 3);
        assert!(job.blur.as_ref().unwrap().smart);
        assert!(job.motion.is_none());
        assert!(matches!(job.naming, NamingMode::Custom { .. }));
    }

    #[test]
    fn test_cli_config_aliases() {
        let text = r#"{"input": "videos", "output": "out", "interval": 0.5, "format": "png",
                       "quality": 80, "ai": true, "adaptive_mode": true, "active_cameras": [0, 1]}"#;
        let settings = JobSettings::from_json5(text).unwrap();
        assert_eq!(settings.input, Some(PathBuf::from("videos")));
        assert_eq!(settings.effective_ai_mode(), AiMode::GenerateMask);

        let job = settings.to_job(Path::new("videos/a.mp4")).unwrap();
        assert_eq!(job.output_dir, PathBuf::from("out"));
        assert_eq!(job.format, OutputFormat::Png);
        assert_eq!(job.jpeg_quality, 80);
        assert_eq!(job.motion.as_ref().unwrap().threshold, DEFAULT_MOTION_THRESHOLD);
    }

    #[test]
    fn test_parse_naming_kind() {
        assert_eq!("RealityScan".parse::<NamingKind>().unwrap(), NamingKind::Realityscan);
        assert_eq!("custom".parse::<NamingKind>().unwrap(), NamingKind::Custom);
        assert!("fancy".parse::<NamingKind>().is_err());
    }

    #[test]
    fn test_validation() {
        let settings = JobSettings {
            interval_value: 0.0,
            ..Default::default()
        };
        assert!(matches!(settings.to_job(Path::new("a.mp4")), Err(ExtractError::Config(_))));

        let settings = JobSettings {
            active_cameras: Some(ActiveCameras::Text("0,x".into())),
            ..Default::default()
        };
        assert!(matches!(settings.to_job(Path::new("a.mp4")), Err(ExtractError::Config(_))));

        assert!(JobSettings::from_json5("{resolution: }").is_err());
    }

    #[test]
    fn test_gpx_path_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let settings = JobSettings {
            export_telemetry: true,
            gpx_path: Some(dir.path().join("missing.gpx")),
            ..Default::default()
        };
        // 文件不存在也能生成任务
        let job = settings.to_job(Path::new("a.mp4")).unwrap();
        assert!(matches!(&job.telemetry, TelemetrySetting::GpxFile(p) if p.ends_with("missing.gpx")));

        let settings = JobSettings {
            gpx_path: Some(dir.path().join("track.gpx")),
            ..Default::default()
        };
        let job = settings.to_job(Path::new("a.mp4")).unwrap();
        assert!(matches!(job.telemetry, TelemetrySetting::Disabled));
    }

    #[test]
    fn test_round_trip_json() {
        let settings = JobSettings::default();
        let json = settings.to_json().unwrap();
        assert_eq!(JobSettings::from_json5(&json).unwrap(), settings);
    }
}
