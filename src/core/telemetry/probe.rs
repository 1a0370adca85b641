//! 从视频容器和旁车文件收集遥测来源，首次查询时解析并缓存

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};
use once_cell::unsync::OnceCell;

use super::{parse_logged, TelemetryInput, TelemetryKind, TelemetrySample, TelemetryTrack};
use crate::core::error::{ExtractError, Result};
use crate::core::tools;
use crate::core::video::probe::{self as ffprobe, DataStream, ProbeReport};

/// 任务级遥测设置
#[derive(Debug, Clone, Default)]
pub enum TelemetrySetting {
    #[default]
    Disabled,
    /// 从视频内嵌流 / 字幕 / `<stem>.gpx` 中查找
    FromVideo,
    /// 指定的 GPX 文件，首次查询时读取；读取或解析失败只告警
    GpxFile(PathBuf),
    Preloaded(TelemetryTrack),
}

/// `<video stem>.gpx` next to the video.
pub fn sidecar_path(video: &Path) -> PathBuf {
    video.with_extension("gpx")
}

fn extract_stream(video: &Path, index: usize, format: &str, kind: TelemetryKind) -> Result<Vec<u8>> {
    let map = format!("0:{}", index);
    let output = Command::new(tools::ffmpeg_path())
        .args(["-v", "error", "-i"])
        .arg(video)
        .args(["-map", map.as_str(), "-f", format, "-"])
        .output()
        .map_err(|e| ExtractError::telemetry(kind, format!("failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        return Err(ExtractError::telemetry(
            kind,
            format!(
                "ffmpeg could not extract stream {}: {}",
                index,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(output.stdout)
}

#[derive(Debug, Clone, PartialEq)]
enum Candidate {
    Embedded(DataStream),
    Subtitle(usize),
    Sidecar(PathBuf),
}

impl Candidate {
    fn load(&self, video: &Path, duration: Option<f64>) -> Result<TelemetryInput> {
        match self {
            Candidate::Embedded(DataStream::Gpmf(i)) => {
                Ok(TelemetryInput::Gpmf(extract_stream(video, *i, "data", TelemetryKind::Gpmf)?))
            }
            Candidate::Embedded(DataStream::Camm(i)) => Ok(TelemetryInput::Camm {
                data: extract_stream(video, *i, "data", TelemetryKind::Camm)?,
                duration,
            }),
            Candidate::Subtitle(i) => {
                let raw = extract_stream(video, *i, "srt", TelemetryKind::Subtitle)?;
                Ok(TelemetryInput::Subtitle(String::from_utf8_lossy(&raw).into_owned()))
            }
            Candidate::Sidecar(path) => std::fs::read_to_string(path)
                .map(TelemetryInput::Gpx)
                .map_err(|e| ExtractError::telemetry(TelemetryKind::Gpx, e.to_string())),
        }
    }
}

/// 按优先级排列的候选来源
fn candidates(video: &Path, report: &ProbeReport) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = report.data_streams.iter().cloned().map(Candidate::Embedded).collect();
    if let Some(i) = report.subtitle_stream {
        out.push(Candidate::Subtitle(i));
    }
    let gpx = sidecar_path(video);
    if gpx.is_file() {
        out.push(Candidate::Sidecar(gpx));
    }
    out
}

fn load_gpx_file(path: &Path) -> Option<TelemetryTrack> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_logged(&TelemetryInput::Gpx(text)),
        Err(e) => {
            warn!("GPX file {} unreadable, continuing without telemetry: {}", path.display(), e);
            None
        }
    }
}

/// 惰性遥测加载器：第一次查询时解析，之后复用
pub struct TelemetryLoader {
    setting: TelemetrySetting,
    video_path: PathBuf,
    probe: Option<ProbeReport>,
    track: OnceCell<Option<TelemetryTrack>>,
}

impl TelemetryLoader {
    pub fn new(setting: TelemetrySetting, video_path: impl Into<PathBuf>, probe: Option<ProbeReport>) -> Self {
        Self {
            setting,
            video_path: video_path.into(),
            probe,
            track: OnceCell::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.setting, TelemetrySetting::Disabled)
    }

    pub fn track(&self) -> Option<&TelemetryTrack> {
        self.track.get_or_init(|| self.load()).as_ref()
    }

    /// 插值查询；没有可用遥测时返回 `NoTelemetryAvailable`
    pub fn sample_at(&self, t: f64) -> Result<TelemetrySample> {
        self.track()
            .ok_or(ExtractError::NoTelemetryAvailable)?
            .sample_at(t)
    }

    fn load(&self) -> Option<TelemetryTrack> {
        match &self.setting {
            TelemetrySetting::Disabled => None,
            TelemetrySetting::Preloaded(track) => Some(track.clone()).filter(|t| !t.is_empty()),
            TelemetrySetting::FromVideo => self.load_from_video(),
            TelemetrySetting::GpxFile(path) => load_gpx_file(path),
        }
    }

    fn load_from_video(&self) -> Option<TelemetryTrack> {
        let probed;
        let report = match &self.probe {
            Some(report) => report,
            None => {
                probed = ffprobe::probe(&self.video_path).unwrap_or_else(|e| {
                    warn!("Telemetry probe failed, only the GPX sidecar is checked: {}", e);
                    ProbeReport::default()
                });
                &probed
            }
        };

        for candidate in candidates(&self.video_path, report) {
            match candidate.load(&self.video_path, report.duration) {
                Ok(input) => {
                    if let Some(track) = parse_logged(&input) {
                        return Some(track);
                    }
                }
                Err(e) => warn!("Telemetry source unavailable, trying next: {}", e),
            }
        }

        info!("No telemetry found for {}", self.video_path.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPX: &str = r#"<gpx><trk><trkseg>
        <trkpt lat="10.0" lon="20.0"><ele>5</ele><time>2024-01-01T00:00:00Z</time></trkpt>
        <trkpt lat="11.0" lon="21.0"><ele>6</ele><time>2024-01-01T00:00:10Z</time></trkpt>
    </trkseg></trk></gpx>"#;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(sidecar_path(Path::new("/v/clip.MP4")), PathBuf::from("/v/clip.gpx"));
    }

    #[test]
    fn test_candidate_order() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(dir.path().join("clip.gpx"), GPX).unwrap();

        let report = ProbeReport {
            data_streams: vec![DataStream::Camm(3)],
            subtitle_stream: Some(2),
            ..Default::default()
        };
        assert_eq!(
            candidates(&video, &report),
            vec![
                Candidate::Embedded(DataStream::Camm(3)),
                Candidate::Subtitle(2),
                Candidate::Sidecar(dir.path().join("clip.gpx")),
            ]
        );
    }

    #[test]
    fn test_lazy_sidecar_load() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("walk.mp4");
        std::fs::write(dir.path().join("walk.gpx"), GPX).unwrap();

        let loader = TelemetryLoader::new(TelemetrySetting::FromVideo, &video, Some(ProbeReport::default()));
        let s = loader.sample_at(5.0).unwrap();
        assert!((s.latitude - 10.5).abs() < 1e-9);
        assert_eq!(s.altitude, Some(5.5));
        assert_eq!(loader.track().unwrap().len(), 2);
    }

    #[test]
    fn test_disabled_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("none.mp4");

        let loader = TelemetryLoader::new(TelemetrySetting::Disabled, &video, None);
        assert!(!loader.is_enabled());
        assert!(matches!(loader.sample_at(0.0), Err(ExtractError::NoTelemetryAvailable)));

        let loader = TelemetryLoader::new(TelemetrySetting::FromVideo, &video, Some(ProbeReport::default()));
        assert!(matches!(loader.sample_at(0.0), Err(ExtractError::NoTelemetryAvailable)));
    }

    #[test]
    fn test_gpx_file_loaded_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let gpx = dir.path().join("route.gpx");

        // 文件在加载器创建之后才出现
        let loader = TelemetryLoader::new(TelemetrySetting::GpxFile(gpx.clone()), "x.mp4", None);
        std::fs::write(&gpx, GPX).unwrap();
        assert!(loader.is_enabled());
        assert!((loader.sample_at(10.0).unwrap().longitude - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_gpx_file_yields_no_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TelemetryLoader::new(TelemetrySetting::GpxFile(dir.path().join("missing.gpx")), "x.mp4", None);
        assert!(missing.track().is_none());
        assert!(matches!(missing.sample_at(0.0), Err(ExtractError::NoTelemetryAvailable)));

        let broken = dir.path().join("broken.gpx");
        std::fs::write(&broken, "lat,lon\n1,2\n").unwrap();
        let loader = TelemetryLoader::new(TelemetrySetting::GpxFile(broken), "x.mp4", None);
        assert!(matches!(loader.sample_at(0.0), Err(ExtractError::NoTelemetryAvailable)));
    }

    #[test]
    fn test_preloaded_track() {
        let track = TelemetryTrack::from_samples(vec![TelemetrySample::new(0.0, 1.0, 2.0)]);
        let loader = TelemetryLoader::new(TelemetrySetting::Preloaded(track), "x.mp4", None);
        assert_eq!(loader.sample_at(3.0).unwrap().longitude, 2.0);
    }
}
