//! 批处理：逐个视频运行流水线
//!
//! 单个视频失败只记录在它自己的报告里，不影响后续视频。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use crate::core::detector::SubjectDetector;
use crate::core::error::{ExtractError, Result};
use crate::core::metadata::MetadataWriter;
use crate::core::pipeline::{self, CancelToken, ExtractionSummary, Job, PipelineState, ProgressSink};
use crate::core::video::{FfmpegFrameSource, FrameSource};

type SourceFactory = Box<dyn Fn(&Path) -> Result<Box<dyn FrameSource>> + Send + Sync>;
type MetadataFactory = Box<dyn Fn() -> Box<dyn MetadataWriter> + Send + Sync>;

/// 单个视频的结果
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub video: PathBuf,
    pub summary: Option<ExtractionSummary>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self
                .summary
                .as_ref()
                .map_or(false, |s| s.final_state == PipelineState::Done)
    }

    pub fn images_written(&self) -> u64 {
        self.summary.as_ref().map_or(0, |s| s.images_written)
    }
}

pub struct BatchRunner {
    threads: usize,
    cancel: CancelToken,
    open_source: SourceFactory,
    metadata: Option<MetadataFactory>,
    detector: Option<Arc<dyn SubjectDetector>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl BatchRunner {
    pub fn new() -> Self {
        Self {
            threads: num_cpus::get(),
            cancel: CancelToken::new(),
            open_source: Box::new(|path| Ok(Box::new(FfmpegFrameSource::open(path)?) as Box<dyn FrameSource>)),
            metadata: None,
            detector: None,
            progress: None,
        }
    }

    /// 投影并行线程数，0 表示按 CPU 核数
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { num_cpus::get() } else { threads };
        self
    }

    pub fn with_source_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.open_source = Box::new(factory);
        self
    }

    pub fn with_metadata_writer<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn MetadataWriter> + Send + Sync + 'static,
    {
        self.metadata = Some(Box::new(factory));
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn SubjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn run_one(&self, job: Job) -> Result<ExtractionSummary> {
        let mut source = (self.open_source)(&job.video_path)?;
        pipeline::ensure_output_dir(&job.output_dir)?;
        pipeline::run_job(
            job,
            source.as_mut(),
            self.metadata.as_ref().map(|f| f()),
            self.detector.clone(),
            self.progress.clone(),
            self.cancel.clone(),
        )
    }

    /// 依次处理所有任务
    pub fn run(&self, jobs: Vec<Job>) -> Vec<JobReport> {
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(self.threads).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Falling back to the global thread pool: {}", e);
                None
            }
        };

        let total = jobs.len();
        info!("🎬 Batch: {} videos, {} threads", total, self.threads);
        let mut reports = Vec::with_capacity(total);

        for (i, job) in jobs.into_iter().enumerate() {
            let video = job.video_path.clone();
            if self.cancel.is_cancelled() {
                reports.push(JobReport {
                    video,
                    summary: None,
                    error: Some("cancelled before start".to_string()),
                });
                continue;
            }

            info!("[{}/{}] {}", i + 1, total, video.display());
            let result = match &pool {
                Some(pool) => pool.install(|| self.run_one(job)),
                None => self.run_one(job),
            };

            let report = match result {
                Ok(summary) => JobReport {
                    video,
                    summary: Some(summary),
                    error: None,
                },
                Err(e) => {
                    log_failure(&video, &e);
                    JobReport {
                        video,
                        summary: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }

        let ok = reports.iter().filter(|r| r.succeeded()).count();
        info!("✅ Batch finished: {}/{} videos", ok, total);
        reports
    }
}

fn log_failure(video: &Path, e: &ExtractError) {
    if e.is_job_fatal() {
        error!("{} failed: {}", video.display(), e);
    } else {
        warn!("{}: {}", video.display(), e);
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}
