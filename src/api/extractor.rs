//! 全景视频抽帧器

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::api::models::JobSettings;
use crate::core::batch::{BatchRunner, JobReport};
use crate::core::detector::SubjectDetector;
use crate::core::error::Result;
use crate::core::metadata::{ExiftoolWriter, MetadataWriter};
use crate::core::pipeline::{LogProgress, ProgressSink};
use crate::core::video::FrameSource;

pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "mkv", "avi"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// 单个文件直接返回；目录递归查找视频，按路径排序
pub fn discover_videos(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_video_file(p))
        .collect();
    files.sort();
    files
}

/// 累计统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractorStats {
    pub videos_processed: u64,
    pub videos_failed: u64,
    pub images_written: u64,
    pub masks_written: u64,
}

/// 全景视频抽帧器 - 重投影 + 门控 + GPS 写入
///
/// ```ignore
/// let extractor = PanoExtractor::create(JobSettings::default());
/// let reports = extractor.process_videos(&[PathBuf::from("walk.mp4")]);
/// let stats = extractor.stats();
/// ```
pub struct PanoExtractor {
    settings: JobSettings,
    runner: BatchRunner,
    stats: Mutex<ExtractorStats>,
}

impl PanoExtractor {
    pub fn create(settings: JobSettings) -> Self {
        crate::init_logging();

        let mut runner = BatchRunner::new()
            .with_threads(settings.threads)
            .with_progress(Arc::new(LogProgress::new()));

        if settings.export_telemetry {
            let exiftool = ExiftoolWriter::new();
            if exiftool.is_available() {
                runner = runner.with_metadata_writer(|| Box::new(ExiftoolWriter::new()) as Box<dyn MetadataWriter>);
            } else {
                warn!("exiftool not found, GPS will not be embedded");
            }
        }

        info!("🎬 PanoExtractor: created");
        Self {
            settings,
            runner,
            stats: Mutex::new(ExtractorStats::default()),
        }
    }

    /// 读取 JSON5 配置文件
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::create(JobSettings::load(path)?))
    }

    pub fn with_detector(mut self, detector: Arc<dyn SubjectDetector>) -> Self {
        self.runner = std::mem::take(&mut self.runner).with_detector(detector);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.runner = std::mem::take(&mut self.runner).with_progress(progress);
        self
    }

    /// 替换视频解码来源（默认 ffmpeg）
    pub fn with_source_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.runner = std::mem::take(&mut self.runner).with_source_factory(factory);
        self
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// 批量处理视频；单个视频的错误记录在报告中
    pub fn process_videos(&self, videos: &[PathBuf]) -> Vec<JobReport> {
        let mut jobs = Vec::with_capacity(videos.len());
        let mut reports = Vec::with_capacity(videos.len());
        let mut order = Vec::with_capacity(videos.len());

        for video in videos {
            match self.settings.to_job(video) {
                Ok(job) => {
                    order.push(None);
                    jobs.push(job);
                }
                Err(e) => {
                    warn!("{}: {}", video.display(), e);
                    order.push(Some(JobReport {
                        video: video.clone(),
                        summary: None,
                        error: Some(e.to_string()),
                    }));
                }
            }
        }

        let mut ran = self.runner.run(jobs).into_iter();
        for slot in order {
            match slot {
                Some(report) => reports.push(report),
                None => reports.extend(ran.next()),
            }
        }

        self.record(&reports);
        reports
    }

    fn record(&self, reports: &[JobReport]) {
        if let Ok(mut stats) = self.stats.lock() {
            for report in reports {
                if report.succeeded() {
                    stats.videos_processed += 1;
                } else {
                    stats.videos_failed += 1;
                }
                if let Some(summary) = &report.summary {
                    stats.images_written += summary.images_written;
                    stats.masks_written += summary.masks_written;
                }
            }
        }
    }

    /// 取消当前及后续视频
    pub fn cancel(&self) {
        info!("PanoExtractor: cancel requested");
        self.runner.cancel();
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// 清零统计并清除取消标志
    pub fn reset(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = ExtractorStats::default();
        }
        self.runner.cancel_token().clear();
    }
}

impl Drop for PanoExtractor {
    fn drop(&mut self) {
        info!("🗑️ PanoExtractor: released");
    }
}
