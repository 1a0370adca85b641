//! 提取流水线 - 单个视频从解码到写出
//!
//! 处理顺序：
//! 1. 间隔策略 - 按源帧号选出候选帧
//! 2. 运动门控 - 自适应模式下丢弃几乎静止的帧
//! 3. 投影 - 每个激活相机并行重投影
//! 4. 模糊门控 + 锐化 - 逐视角
//! 5. 主体检测 - 跳过或生成遮罩
//! 6. 遥测 - 帧时间戳插值出 GPS

pub mod progress;
pub mod sink;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use log::{debug, info, warn};
use serde::Serialize;

use crate::core::detector::{keep_all_mask, AiMode, DetectionOutcome, SubjectDetector};
use crate::core::error::{ExtractError, Result};
use crate::core::naming::{output_names, NamingMode, OutputFormat};
use crate::core::projection::Projector;
use crate::core::rig::{build_rig, RigConfig};
use crate::core::telemetry::{TelemetryLoader, TelemetrySetting};
use crate::core::video::{
    BlurGate, BlurGateConfig, DecisionReason, Frame, FrameSource, MotionGate, MotionGateConfig, ProjectedFrame,
};

pub use progress::{CancelToken, LogProgress, ProgressSink};
pub use sink::{DiskSink, MemorySink, OutputSink, WriteReport, WriteRequest, DEFAULT_JPEG_QUALITY};
pub use state::{PipelineEvent, PipelineState, StateAction, StateMachine};

pub const DEFAULT_RESOLUTION: u32 = 2048;

/// 候选帧间隔
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalPolicy {
    Seconds(f64),
    Frames(u32),
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        IntervalPolicy::Seconds(1.0)
    }
}

impl IntervalPolicy {
    /// 以帧为单位的步长，至少为 1
    pub fn step(&self, fps: f64) -> u64 {
        match *self {
            IntervalPolicy::Frames(n) => n.max(1) as u64,
            IntervalPolicy::Seconds(s) => {
                let frames = (fps * s).round();
                if frames.is_finite() && frames >= 1.0 {
                    frames as u64
                } else {
                    1
                }
            }
        }
    }
}

/// 单个视频的任务配置
#[derive(Debug, Clone)]
pub struct Job {
    pub video_path: PathBuf,
    pub output_dir: PathBuf,
    pub rig: RigConfig,
    /// 输出正方形边长
    pub resolution: u32,
    pub interval: IntervalPolicy,
    /// `Some` 即自适应模式
    pub motion: Option<MotionGateConfig>,
    pub blur: Option<BlurGateConfig>,
    /// 锐化强度
    pub sharpen: Option<f32>,
    pub ai_mode: AiMode,
    pub telemetry: TelemetrySetting,
    pub naming: NamingMode,
    pub format: OutputFormat,
    pub jpeg_quality: u8,
}

impl Job {
    pub fn new(video_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            output_dir: output_dir.into(),
            rig: RigConfig::default(),
            resolution: DEFAULT_RESOLUTION,
            interval: IntervalPolicy::default(),
            motion: None,
            blur: None,
            sharpen: None,
            ai_mode: AiMode::None,
            telemetry: TelemetrySetting::Disabled,
            naming: NamingMode::RealityScan,
            format: OutputFormat::Jpg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn video_stem(&self) -> String {
        self.video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }

    /// 最终输出目录
    pub fn processed_dir(&self) -> PathBuf {
        self.output_dir.join(format!("{}_processed", self.video_stem()))
    }
}

/// 运行统计
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub video: String,
    pub frames_decoded: u64,
    pub candidates: u64,
    pub motion_skips: u64,
    pub blurry_views: u64,
    pub ai_skips: u64,
    pub images_written: u64,
    pub masks_written: u64,
    pub exif_failures: u64,
    pub geolocated: bool,
    pub final_state: PipelineState,
}

impl ExtractionSummary {
    fn new(video: String) -> Self {
        Self {
            video,
            frames_decoded: 0,
            candidates: 0,
            motion_skips: 0,
            blurry_views: 0,
            ai_skips: 0,
            images_written: 0,
            masks_written: 0,
            exif_failures: 0,
            geolocated: false,
            final_state: PipelineState::Idle,
        }
    }
}

/// 反锐化掩模：`(1 + s)·img − s·gauss(σ=2)`
pub fn sharpen(image: &RgbImage, strength: f32) -> RgbImage {
    if strength <= 0.0 {
        return image.clone();
    }
    let blurred = image::imageops::blur(image, 2.0);
    let mut out = image.clone();
    for (dst, soft) in out.as_mut().iter_mut().zip(blurred.as_raw()) {
        let v = (1.0 + strength) * *dst as f32 - strength * *soft as f32;
        *dst = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

struct AcceptedView {
    view: ProjectedFrame,
    mask: Option<image::GrayImage>,
}

pub struct ExtractionPipeline {
    job: Job,
    projector: Projector,
    motion_gate: Option<MotionGate>,
    blur_gate: Option<BlurGate>,
    detector: Option<Arc<dyn SubjectDetector>>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancelToken,
    state: StateMachine,
    summary: ExtractionSummary,
}

impl ExtractionPipeline {
    /// 构建相机阵列；配置错误在处理任何帧之前返回
    pub fn new(job: Job) -> Result<Self> {
        let cameras = build_rig(&job.rig)?;
        let projector = Projector::new(cameras, (job.resolution, job.resolution))?;
        let summary = ExtractionSummary::new(job.video_path.display().to_string());

        Ok(Self {
            motion_gate: job.motion.clone().map(MotionGate::with_config),
            blur_gate: job.blur.clone().map(BlurGate::new),
            projector,
            detector: None,
            progress: None,
            cancel: CancelToken::new(),
            state: StateMachine::new(),
            summary,
            job,
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn SubjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> PipelineState {
        self.state.current_state()
    }

    /// 当前统计（失败时即为部分结果）
    pub fn summary(&self) -> &ExtractionSummary {
        &self.summary
    }

    fn advance(&mut self, event: PipelineEvent) -> StateAction {
        let action = self.state.process(event);
        self.summary.final_state = self.state.current_state();
        action
    }

    fn fail(&mut self, error: ExtractError) -> ExtractError {
        self.advance(PipelineEvent::Error);
        error
    }

    /// 处理整段视频
    pub fn run(&mut self, source: &mut dyn FrameSource, sink: &mut dyn OutputSink) -> Result<ExtractionSummary> {
        let info = source.info().clone();
        let step = self.job.interval.step(info.fps);
        let total = info.estimated_frames();
        let file_name = self
            .job
            .video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = self.job.video_stem();
        let telemetry = TelemetryLoader::new(
            self.job.telemetry.clone(),
            &self.job.video_path,
            source.probe_report().cloned(),
        );

        if info.width != info.height * 2 {
            warn!(
                "{} is {}x{}, not 2:1 equirectangular",
                file_name, info.width, info.height
            );
        }
        if self.job.ai_mode != AiMode::None && self.detector.is_none() {
            warn!("AI mode {:?} requested without a detector, views are kept unmasked", self.job.ai_mode);
        }

        info!(
            "🎬 {}: {} cameras, every {} frames, ~{} frames",
            file_name,
            self.projector.cameras().len(),
            step,
            total
        );
        if self.advance(PipelineEvent::Start) == StateAction::Stop {
            warn!("{}: pipeline already {:?}, not restarted", file_name, self.state.current_state());
            return Ok(self.summary.clone());
        }

        loop {
            if self.cancel.is_cancelled() {
                info!("{}: cancelled after {} frames", file_name, self.summary.frames_decoded);
                self.advance(PipelineEvent::CancelRequested);
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.advance(PipelineEvent::EndOfStream);
                    break;
                }
                Err(e) => return Err(self.fail(e)),
            };
            self.summary.frames_decoded += 1;
            if let Some(progress) = &self.progress {
                progress.on_progress(self.summary.frames_decoded, total, &file_name);
            }

            if frame.frame_number % step != 0 {
                self.advance(PipelineEvent::FrameSkipped);
                continue;
            }
            self.summary.candidates += 1;

            let upstream = match self.motion_check(&frame) {
                Ok(Some(reason)) => reason,
                Ok(None) => {
                    self.summary.motion_skips += 1;
                    self.advance(PipelineEvent::FrameSkipped);
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            };
            self.advance(PipelineEvent::FrameSelected);

            let views = match self.projector.project_all(&frame) {
                Ok(views) => views,
                Err(e) => return Err(self.fail(e)),
            };
            self.advance(PipelineEvent::Projected);

            let accepted = self.gate_views(views, upstream);
            if accepted.is_empty() {
                debug!("frame {}: all views rejected", frame.frame_number);
                self.advance(PipelineEvent::ViewsRejected);
                continue;
            }
            self.advance(PipelineEvent::GatesPassed);

            let geolocation = if telemetry.is_enabled() {
                match telemetry.sample_at(frame.timestamp_secs()) {
                    Ok(sample) => Some(sample),
                    Err(e) => {
                        debug!("frame {}: {}", frame.frame_number, e);
                        None
                    }
                }
            } else {
                None
            };
            self.summary.geolocated |= geolocation.is_some();

            for AcceptedView { view, mask } in accepted {
                let request = WriteRequest {
                    frame_index: view.frame_index,
                    names: output_names(&stem, view.frame_index, &view.camera, &self.job.naming, self.job.format),
                    camera: view.camera,
                    image: view.pixels,
                    mask,
                    geolocation,
                };
                let report = match sink.write(request) {
                    Ok(report) => report,
                    Err(e) => return Err(self.fail(e)),
                };
                self.summary.images_written += 1;
                self.summary.masks_written += report.mask_written as u64;
                self.summary.exif_failures += report.metadata_failed as u64;
            }
            self.advance(PipelineEvent::Emitted);
        }

        if telemetry.is_enabled() && !self.summary.geolocated {
            warn!("{}: no geolocation written", file_name);
        }
        info!(
            "✅ {}: {} images from {} candidates ({} motion skips, {} blurry views)",
            file_name,
            self.summary.images_written,
            self.summary.candidates,
            self.summary.motion_skips,
            self.summary.blurry_views
        );
        Ok(self.summary.clone())
    }

    /// `Ok(None)` 表示运动不足
    fn motion_check(&mut self, frame: &Frame) -> Result<Option<DecisionReason>> {
        let Some(gate) = self.motion_gate.as_mut() else {
            return Ok(Some(DecisionReason::ForcedInterval));
        };
        let decision = gate.evaluate(frame)?;
        Ok(decision.extract.then_some(decision.reason))
    }

    fn gate_views(&mut self, views: Vec<ProjectedFrame>, upstream: DecisionReason) -> Vec<AcceptedView> {
        let mut accepted = Vec::with_capacity(views.len());

        for mut view in views {
            if let Some(gate) = self.blur_gate.as_mut() {
                let decision = gate.evaluate(&view.camera, &view.pixels, upstream);
                if !decision.extract {
                    self.summary.blurry_views += 1;
                    continue;
                }
            }

            if let Some(strength) = self.job.sharpen {
                view.pixels = sharpen(&view.pixels, strength);
            }

            let outcome = match (&self.detector, self.job.ai_mode) {
                (_, AiMode::None) | (None, _) => DetectionOutcome::None,
                (Some(detector), mode) => detector.detect(&view, mode),
            };
            let mask = match outcome {
                DetectionOutcome::Skip => {
                    debug!("frame {} {}: subject detected, skipped", view.frame_index, view.camera);
                    self.summary.ai_skips += 1;
                    continue;
                }
                DetectionOutcome::Mask(mask) => Some(mask),
                DetectionOutcome::None if self.job.ai_mode == AiMode::GenerateMask && self.detector.is_some() => {
                    let (w, h) = view.pixels.dimensions();
                    Some(keep_all_mask(w, h))
                }
                DetectionOutcome::None => None,
            };

            accepted.push(AcceptedView { view, mask });
        }

        accepted
    }
}

/// 打开视频并写入磁盘的便捷入口
pub fn run_job(
    job: Job,
    source: &mut dyn FrameSource,
    metadata: Option<Box<dyn crate::core::metadata::MetadataWriter>>,
    detector: Option<Arc<dyn SubjectDetector>>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancelToken,
) -> Result<ExtractionSummary> {
    let mut sink = DiskSink::new(&job.output_dir, &job.video_stem(), job.format).with_jpeg_quality(job.jpeg_quality);
    if let Some(writer) = metadata {
        sink = sink.with_metadata_writer(writer);
    }

    let mut pipeline = ExtractionPipeline::new(job)?.with_cancel_token(cancel);
    if let Some(detector) = detector {
        pipeline = pipeline.with_detector(detector);
    }
    if let Some(progress) = progress {
        pipeline = pipeline.with_progress(progress);
    }
    pipeline.run(source, &mut sink)
}

/// 输出目录是否可写（批处理开始前检查）
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::MockSubjectDetector;
    use crate::core::rig::LayoutMode;
    use crate::core::telemetry::{TelemetrySample, TelemetryTrack};
    use crate::core::video::{MemoryFrameSource, VideoInfo};
    use std::sync::atomic::{AtomicU64, Ordering};

    const W: u32 = 256;
    const H: u32 = 128;

    /// 160x80 正弦纹理全景，水平环绕平移 `shift` 像素
    fn textured_frame(shift: u32, frame_number: u64) -> Frame {
        let (w, h) = (160u32, 80u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let xs = ((x + w - shift) % w) as f32;
                let v = 128.0
                    + 50.0 * (2.0 * std::f32::consts::PI * xs / 20.0).sin()
                    + 50.0 * (2.0 * std::f32::consts::PI * y as f32 / 16.0).sin();
                let g = v.clamp(0.0, 255.0) as u8;
                data.extend_from_slice(&[g, g, g]);
            }
        }
        Frame::new(w, h, data, frame_number * 100, frame_number)
    }

    fn flat_frame(value: u8, frame_number: u64) -> Frame {
        Frame::new(W, H, vec![value; (W * H * 3) as usize], frame_number * 1000, frame_number)
    }

    fn source(frames: Vec<Frame>, fps: f64) -> MemoryFrameSource {
        MemoryFrameSource::from_frames(fps, frames)
    }

    fn cube_job() -> Job {
        let mut job = Job::new("/videos/clip.mp4", "/out");
        job.rig = RigConfig::new(6, LayoutMode::Cube);
        job.resolution = 32;
        job.interval = IntervalPolicy::Frames(1);
        job
    }

    #[test]
    fn test_interval_step() {
        assert_eq!(IntervalPolicy::Frames(0).step(30.0), 1);
        assert_eq!(IntervalPolicy::Frames(5).step(30.0), 5);
        assert_eq!(IntervalPolicy::Seconds(1.0).step(29.97), 30);
        assert_eq!(IntervalPolicy::Seconds(0.5).step(30.0), 15);
        assert_eq!(IntervalPolicy::Seconds(0.001).step(30.0), 1);
        assert_eq!(IntervalPolicy::Seconds(1.0).step(f64::NAN), 1);
    }

    #[test]
    fn test_job_paths() {
        let job = Job::new("/videos/walk.MP4", "/out");
        assert_eq!(job.video_stem(), "walk");
        assert_eq!(job.processed_dir(), PathBuf::from("/out/walk_processed"));
    }

    #[test]
    fn test_invalid_rig_fails_before_frames() {
        let mut job = cube_job();
        job.rig = RigConfig::new(40, LayoutMode::Ring);
        assert!(matches!(ExtractionPipeline::new(job), Err(ExtractError::InvalidRigConfig(_))));
    }

    #[test]
    fn test_interval_and_active_filter() {
        let mut job = cube_job();
        job.interval = IntervalPolicy::Frames(2);
        job.rig = job.rig.with_active_indices([0, 2]);

        let frames = (0..5).map(|i| flat_frame(100, i)).collect();
        let mut src = source(frames, 10.0);
        let mut sink = MemorySink::new();
        let mut pipeline = ExtractionPipeline::new(job).unwrap();
        let summary = pipeline.run(&mut src, &mut sink).unwrap();

        assert_eq!(summary.frames_decoded, 5);
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.images_written, 6);
        assert_eq!(summary.final_state, PipelineState::Done);
        assert_eq!(
            sink.image_names(),
            vec![
                "clip_frame000000_front.jpg",
                "clip_frame000000_back.jpg",
                "clip_frame000002_front.jpg",
                "clip_frame000002_back.jpg",
                "clip_frame000004_front.jpg",
                "clip_frame000004_back.jpg",
            ]
        );
    }

    #[test]
    fn test_finished_pipeline_does_not_rerun() {
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);
        let mut pipeline = ExtractionPipeline::new(job).unwrap();
        let mut sink = MemorySink::new();

        let mut src = source((0..3).map(|i| flat_frame(100, i)).collect(), 10.0);
        let first = pipeline.run(&mut src, &mut sink).unwrap();
        assert_eq!(first.final_state, PipelineState::Done);

        let mut again = source((0..3).map(|i| flat_frame(100, i)).collect(), 10.0);
        let second = pipeline.run(&mut again, &mut sink).unwrap();
        assert_eq!(second.frames_decoded, first.frames_decoded);
        assert_eq!(second.images_written, first.images_written);
        assert_eq!(sink.requests.len(), first.images_written as usize);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_motion_gate_skips_static_frames() {
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);
        job.motion = Some(MotionGateConfig::default());

        let frames = vec![
            textured_frame(0, 0),
            textured_frame(0, 1),
            textured_frame(8, 2),
            textured_frame(8, 3),
        ];
        let mut src = source(frames, 10.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job).unwrap().run(&mut src, &mut sink).unwrap();

        assert_eq!(summary.candidates, 4);
        assert_eq!(summary.motion_skips, 2);
        let indices: Vec<u64> = sink.requests.iter().map(|r| r.frame_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_blur_gate_rejects_flat_views() {
        let mut job = cube_job();
        job.blur = Some(BlurGateConfig::with_threshold(50.0));

        let mut src = source(vec![flat_frame(90, 0)], 10.0);
        let mut sink = MemorySink::new();
        let mut pipeline = ExtractionPipeline::new(job).unwrap();
        let summary = pipeline.run(&mut src, &mut sink).unwrap();

        assert_eq!(summary.blurry_views, 6);
        assert_eq!(summary.images_written, 0);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_ai_skip_and_mask() {
        let mut job = cube_job();
        job.ai_mode = AiMode::SkipFrame;
        let detector = Arc::new(MockSubjectDetector::with_pattern(|_, cam| cam == "up" || cam == "down"));
        let mut src = source(vec![flat_frame(60, 0)], 10.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job)
            .unwrap()
            .with_detector(detector.clone())
            .run(&mut src, &mut sink)
            .unwrap();
        assert_eq!(summary.ai_skips, 2);
        assert_eq!(summary.images_written, 4);

        let mut job = cube_job();
        job.ai_mode = AiMode::GenerateMask;
        let mut src = source(vec![flat_frame(60, 0)], 10.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job)
            .unwrap()
            .with_detector(detector)
            .run(&mut src, &mut sink)
            .unwrap();
        assert_eq!(summary.masks_written, 6);
        let up = sink.requests.iter().find(|r| r.camera == "up").unwrap();
        assert_eq!(up.mask.as_ref().unwrap().get_pixel(16, 16).0, [0]);
        assert_eq!(up.names.mask, "clip_frame000000_up.jpg.mask.png");
    }

    #[test]
    fn test_generate_mask_without_detector() {
        let mut job = cube_job();
        job.ai_mode = AiMode::GenerateMask;
        let mut src = source(vec![flat_frame(60, 0)], 10.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job).unwrap().run(&mut src, &mut sink).unwrap();
        assert_eq!(summary.images_written, 6);
        assert_eq!(summary.masks_written, 0);
    }

    #[test]
    fn test_telemetry_attached() {
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);
        job.interval = IntervalPolicy::Frames(5);
        job.telemetry = TelemetrySetting::Preloaded(TelemetryTrack::from_samples(vec![
            TelemetrySample::new(0.0, 0.0, 100.0),
            TelemetrySample::new(10.0, 10.0, 110.0),
        ]));

        let frames = (0..10).map(|i| flat_frame(50, i)).collect();
        let mut src = source(frames, 1.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job).unwrap().run(&mut src, &mut sink).unwrap();

        assert!(summary.geolocated);
        let gps = sink.requests[1].geolocation.unwrap();
        assert!((gps.latitude - 5.0).abs() < 1e-9);
        assert!((gps.longitude - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_telemetry_is_not_fatal() {
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);
        job.telemetry = TelemetrySetting::Preloaded(TelemetryTrack::from_samples(Vec::new()));
        let mut src = source(vec![flat_frame(50, 0)], 1.0);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job).unwrap().run(&mut src, &mut sink).unwrap();
        assert_eq!(summary.images_written, 1);
        assert!(!summary.geolocated);
        assert!(sink.requests[0].geolocation.is_none());
    }

    #[test]
    fn test_decode_error_keeps_partial_output() {
        let job = cube_job();
        let frames = (0..4).map(|i| flat_frame(50, i)).collect();
        let mut src = source(frames, 10.0).fail_at(2);
        let mut sink = MemorySink::new();
        let mut pipeline = ExtractionPipeline::new(job).unwrap();

        let err = pipeline.run(&mut src, &mut sink).unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert_eq!(pipeline.summary().images_written, 12);
        assert_eq!(sink.requests.len(), 12);
    }

    struct CancelAfter {
        token: CancelToken,
        after: u64,
        calls: AtomicU64,
    }

    impl ProgressSink for CancelAfter {
        fn on_progress(&self, frames_done: u64, _total: u64, _file: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if frames_done >= self.after {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_cancel_between_frames() {
        let token = CancelToken::new();
        let progress = Arc::new(CancelAfter {
            token: token.clone(),
            after: 2,
            calls: AtomicU64::new(0),
        });
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);

        let frames = (0..6).map(|i| flat_frame(50, i)).collect();
        let mut src = source(frames, 10.0);
        let mut sink = MemorySink::new();
        let mut pipeline = ExtractionPipeline::new(job)
            .unwrap()
            .with_cancel_token(token)
            .with_progress(progress.clone());
        let summary = pipeline.run(&mut src, &mut sink).unwrap();

        assert_eq!(summary.final_state, PipelineState::Cancelled);
        assert_eq!(summary.frames_decoded, 2);
        assert_eq!(sink.requests.len(), 2);
        assert_eq!(progress.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disk_run_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new(dir.path().join("room.mp4"), dir.path());
        job.rig = RigConfig::new(6, LayoutMode::Cube).with_active_indices([1]);
        job.resolution = 24;
        job.format = OutputFormat::Png;

        let mut src = source(vec![flat_frame(70, 0)], 10.0);
        let summary = run_job(job, &mut src, None, None, None, CancelToken::new()).unwrap();
        assert_eq!(summary.images_written, 1);
        assert!(dir.path().join("room_processed/room_frame000000_right.png").is_file());
    }

    #[test]
    fn test_sharpen() {
        let mut img = RgbImage::from_pixel(20, 20, image::Rgb([100, 100, 100]));
        for y in 0..20 {
            for x in 10..20 {
                img.put_pixel(x, y, image::Rgb([200, 200, 200]));
            }
        }
        let out = sharpen(&img, 1.0);
        assert!(out.get_pixel(9, 10).0[0] < 100);
        assert!(out.get_pixel(10, 10).0[0] > 200);
        assert!((out.get_pixel(2, 10).0[0] as i32 - 100).abs() <= 1);
        assert_eq!(sharpen(&img, 0.0), img);
    }

    #[test]
    fn test_memory_source_info_used_for_step() {
        let info = VideoInfo {
            width: W,
            height: H,
            fps: 4.0,
            frame_count: None,
            duration: Some(2.0),
        };
        let frames = (0..8).map(|i| flat_frame(50, i)).collect();
        let mut src = MemoryFrameSource::new(info, frames);
        let mut job = cube_job();
        job.rig = job.rig.with_active_indices([0]);
        job.interval = IntervalPolicy::Seconds(0.5);
        let mut sink = MemorySink::new();
        let summary = ExtractionPipeline::new(job).unwrap().run(&mut src, &mut sink).unwrap();
        assert_eq!(summary.candidates, 4);
    }
}
