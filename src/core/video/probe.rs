//! ffprobe 封装：视频流尺寸/帧率、遥测数据流与字幕流

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use super::frame::VideoInfo;
use crate::core::error::{ExtractError, Result};
use crate::core::tools;

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    index: Option<usize>,
    codec_type: Option<String>,
    codec_tag_string: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

/// 内嵌的遥测数据流
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStream {
    Gpmf(usize),
    Camm(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub video: Option<VideoInfo>,
    pub data_streams: Vec<DataStream>,
    /// 第一个字幕流
    pub subtitle_stream: Option<usize>,
    pub duration: Option<f64>,
}

/// Parse frame rate strings like "30000/1001".
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0 && num > 0.0).then(|| num / den);
    }
    rate.parse().ok().filter(|r: &f64| *r > 0.0)
}

fn parse_secs(value: Option<&str>) -> Option<f64> {
    value?.parse().ok().filter(|d: &f64| d.is_finite() && *d > 0.0)
}

pub fn parse_probe_json(json: &[u8]) -> Result<ProbeReport> {
    let output: FFprobeOutput = serde_json::from_slice(json)?;
    let mut report = ProbeReport {
        duration: output.format.as_ref().and_then(|f| parse_secs(f.duration.as_deref())),
        ..Default::default()
    };

    for stream in output.streams.unwrap_or_default() {
        let tag = stream.codec_tag_string.as_deref().unwrap_or_default();
        match stream.codec_type.as_deref() {
            Some("video") if report.video.is_none() => {
                let (Some(width), Some(height)) = (stream.width, stream.height) else {
                    continue;
                };
                let fps = parse_frame_rate(stream.avg_frame_rate.as_deref())
                    .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()))
                    .unwrap_or(30.0);
                report.video = Some(VideoInfo {
                    width,
                    height,
                    fps,
                    frame_count: stream.nb_frames.as_deref().and_then(|n| n.parse().ok()),
                    duration: parse_secs(stream.duration.as_deref()).or(report.duration),
                });
            }
            Some("data") => match (stream.index, tag) {
                (Some(i), t) if t.contains("gpmd") => report.data_streams.push(DataStream::Gpmf(i)),
                (Some(i), t) if t.contains("camm") => report.data_streams.push(DataStream::Camm(i)),
                _ => {}
            },
            Some("subtitle") if report.subtitle_stream.is_none() => {
                report.subtitle_stream = stream.index;
            }
            _ => {}
        }
    }

    Ok(report)
}

/// 运行 ffprobe
pub fn probe(path: &Path) -> Result<ProbeReport> {
    let output = Command::new(tools::ffprobe_path())
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| ExtractError::Decode(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(ExtractError::Decode(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_json(&output.stdout)
}
