//! pano_extract - 360° 视频转针孔相机图像
//!
//! Flags override values loaded from `--config`.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};

use pano_extract::api::models::{ActiveCameras, IntervalUnit, JobSettings, NamingKind};
use pano_extract::api::{discover_videos, PanoExtractor};
use pano_extract::core::detector::AiMode;
use pano_extract::core::naming::OutputFormat;
use pano_extract::core::rig::LayoutMode;

#[derive(Parser, Debug)]
#[command(name = "pano_extract", about = "Extract pinhole views from 360° equirectangular video")]
struct Args {
    /// JSON5 configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Video file or directory (searched recursively)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output root; each video gets `<stem>_processed/`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds between candidate frames
    #[arg(long, conflicts_with = "every_frames")]
    interval: Option<f64>,

    /// Frames between candidate frames
    #[arg(long)]
    every_frames: Option<u32>,

    /// jpg, png or tiff
    #[arg(long)]
    format: Option<OutputFormat>,

    #[arg(long)]
    quality: Option<u8>,

    #[arg(long)]
    resolution: Option<u32>,

    #[arg(long)]
    camera_count: Option<u32>,

    /// ring, cube, fibonacci or adaptive
    #[arg(long)]
    layout: Option<LayoutMode>,

    #[arg(long)]
    fov: Option<f64>,

    /// Pitch offset for horizontal views (degrees)
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<f64>,

    /// Comma-separated camera indices, e.g. "0,1,4"
    #[arg(long)]
    active_cameras: Option<String>,

    /// Skip frames without enough motion
    #[arg(long)]
    adaptive: bool,

    #[arg(long)]
    motion_threshold: Option<f32>,

    /// Drop blurry views
    #[arg(long)]
    blur: bool,

    #[arg(long)]
    blur_threshold: Option<f32>,

    /// Compare each view against its own recent sharpness
    #[arg(long)]
    smart_blur: bool,

    /// Unsharp-mask strength
    #[arg(long)]
    sharpen: Option<f32>,

    #[arg(long)]
    ai_mask: bool,

    #[arg(long, conflicts_with = "ai_mask")]
    ai_skip: bool,

    /// Embed GPS into written images
    #[arg(long)]
    export_telemetry: bool,

    /// Use this GPX track instead of telemetry found in the video
    #[arg(long)]
    gpx: Option<PathBuf>,

    /// realityscan, simple or custom
    #[arg(long)]
    naming: Option<NamingKind>,

    #[arg(long)]
    image_pattern: Option<String>,

    #[arg(long)]
    mask_pattern: Option<String>,

    /// Projection threads (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print the effective settings as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

impl Args {
    fn apply(&self, settings: &mut JobSettings) {
        if let Some(v) = &self.input {
            settings.input = Some(v.clone());
        }
        if let Some(v) = &self.output {
            settings.output_dir = Some(v.clone());
        }
        if let Some(v) = self.interval {
            settings.interval_value = v;
            settings.interval_unit = IntervalUnit::Seconds;
        }
        if let Some(v) = self.every_frames {
            settings.interval_value = v as f64;
            settings.interval_unit = IntervalUnit::Frames;
        }
        if let Some(v) = self.format {
            settings.output_format = v;
        }
        if let Some(v) = self.quality {
            settings.jpeg_quality = v;
        }
        if let Some(v) = self.resolution {
            settings.resolution = v;
        }
        if let Some(v) = self.camera_count {
            settings.camera_count = v;
        }
        if let Some(v) = self.layout {
            settings.layout_mode = v;
        }
        if let Some(v) = self.fov {
            settings.fov = v;
        }
        if let Some(v) = self.pitch {
            settings.pitch_offset = v;
        }
        if let Some(v) = &self.active_cameras {
            settings.active_cameras = Some(ActiveCameras::Text(v.clone()));
        }
        if self.adaptive {
            settings.adaptive_mode = true;
        }
        if let Some(v) = self.motion_threshold {
            settings.adaptive_threshold = v;
        }
        if self.blur || self.smart_blur {
            settings.blur_filter_enabled = true;
        }
        if self.smart_blur {
            settings.smart_blur_enabled = true;
        }
        if let Some(v) = self.blur_threshold {
            settings.blur_threshold = v;
        }
        if let Some(v) = self.sharpen {
            settings.sharpening_enabled = true;
            settings.sharpening_strength = v;
        }
        if self.ai_skip {
            settings.ai_mode = AiMode::SkipFrame;
        } else if self.ai_mask {
            settings.ai_mode = AiMode::GenerateMask;
        }
        if self.export_telemetry || self.gpx.is_some() {
            settings.export_telemetry = true;
        }
        if let Some(v) = &self.gpx {
            settings.gpx_path = Some(v.clone());
        }
        if let Some(v) = self.naming {
            settings.naming_mode = v;
        }
        if let Some(v) = &self.image_pattern {
            settings.image_pattern = v.clone();
        }
        if let Some(v) = &self.mask_pattern {
            settings.mask_pattern = v.clone();
        }
        if let Some(v) = self.threads {
            settings.threads = v;
        }
    }
}

fn main() -> Result<()> {
    pano_extract::init_logging();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => {
            let s = JobSettings::load(path).with_context(|| format!("loading {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            s
        }
        None => JobSettings::default(),
    };
    args.apply(&mut settings);

    if args.dump_config {
        println!("{}", settings.to_json()?);
        return Ok(());
    }

    let input = settings
        .input
        .clone()
        .ok_or_else(|| anyhow!("input path is required (--input or \"input\" in the config)"))?;
    if !input.exists() {
        bail!("input path not found: {}", input.display());
    }
    if settings.output_dir.is_none() {
        let default = std::env::current_dir()?.join("output");
        warn!("No output path specified, using {}", default.display());
        settings.output_dir = Some(default);
    }

    let videos = discover_videos(&input);
    if videos.is_empty() {
        bail!("no video files found under {}", input.display());
    }
    info!("Found {} video(s)", videos.len());

    let extractor = PanoExtractor::create(settings);
    let reports = extractor.process_videos(&videos);

    for report in reports.iter().filter(|r| !r.succeeded()) {
        error!(
            "{}: {}",
            report.video.display(),
            report.error.as_deref().unwrap_or("did not finish")
        );
    }
    let stats = extractor.stats();
    info!(
        "{} images, {} masks from {} videos ({} failed)",
        stats.images_written, stats.masks_written, stats.videos_processed, stats.videos_failed
    );

    if stats.videos_failed > 0 {
        bail!("{} of {} videos failed", stats.videos_failed, reports.len());
    }
    Ok(())
}
