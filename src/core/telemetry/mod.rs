//! 遥测轨迹 - GPS 时间序列
//!
//! 四种来源（GPMF、CAMM、字幕、GPX 旁车文件）统一解析为有序的
//! [`TelemetrySample`] 序列，按时间戳线性插值查询。

pub mod camm;
pub mod gpmf;
pub mod gpx;
pub mod probe;
pub mod srt;

use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::error::{ExtractError, Result};

pub use probe::{TelemetryLoader, TelemetrySetting};

/// 遥测来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Gpmf,
    Camm,
    Subtitle,
    Gpx,
}

impl TelemetryKind {
    /// 数字越小优先级越高：内嵌二进制 > 字幕 > 旁车文件
    pub fn priority(self) -> u8 {
        match self {
            TelemetryKind::Gpmf | TelemetryKind::Camm => 0,
            TelemetryKind::Subtitle => 1,
            TelemetryKind::Gpx => 2,
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryKind::Gpmf => "gpmf",
            TelemetryKind::Camm => "camm",
            TelemetryKind::Subtitle => "subtitle",
            TelemetryKind::Gpx => "gpx",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// 相对视频开头的秒数
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub acceleration: Option<[f64; 3]>,
}

impl TelemetrySample {
    pub fn new(timestamp: f64, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude: None,
            acceleration: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_acceleration(mut self, acceleration: [f64; 3]) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Coordinates a GPS receiver could plausibly report. `(0, 0)` is treated as "no fix".
pub fn is_plausible_fix(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
        && (latitude.abs() > 1e-4 || longitude.abs() > 1e-4)
}

/// 有序遥测轨迹，构建后不可变
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryTrack {
    samples: Vec<TelemetrySample>,
}

impl TelemetryTrack {
    /// 排序（稳定）并去掉重复时间戳，保留最先出现的样本
    pub fn from_samples(mut samples: Vec<TelemetrySample>) -> Self {
        samples.retain(TelemetrySample::is_finite);
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        samples.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);
        Self { samples }
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        Some((self.samples.first()?.timestamp, self.samples.last()?.timestamp))
    }

    /// 查询时间戳 `t`（秒）对应的插值样本，超出范围时取边界样本
    pub fn sample_at(&self, t: f64) -> Result<TelemetrySample> {
        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(ExtractError::NoTelemetryAvailable),
        };

        if t <= first.timestamp {
            return Ok(TelemetrySample { timestamp: t, ..*first });
        }
        if t >= last.timestamp {
            return Ok(TelemetrySample { timestamp: t, ..*last });
        }

        // 第一个时间戳 > t 的位置，区间为 [idx-1, idx]
        let idx = self.samples.partition_point(|s| s.timestamp <= t);
        let (a, b) = (&self.samples[idx - 1], &self.samples[idx]);
        let ratio = (t - a.timestamp) / (b.timestamp - a.timestamp);
        Ok(interpolate(a, b, ratio, t))
    }
}

fn lerp(a: f64, b: f64, ratio: f64) -> f64 {
    a + (b - a) * ratio
}

fn lerp_longitude(a: f64, b: f64, ratio: f64) -> f64 {
    let mut delta = b - a;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }
    let lon = a + delta * ratio;
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// 可选字段：两端都有值才插值，否则取更近一端的值
fn lerp_option<T: Copy>(a: Option<T>, b: Option<T>, ratio: f64, mix: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(mix(a, b)),
        _ if ratio < 0.5 => a.or(b),
        _ => b.or(a),
    }
}

fn interpolate(a: &TelemetrySample, b: &TelemetrySample, ratio: f64, t: f64) -> TelemetrySample {
    TelemetrySample {
        timestamp: t,
        latitude: lerp(a.latitude, b.latitude, ratio),
        longitude: lerp_longitude(a.longitude, b.longitude, ratio),
        altitude: lerp_option(a.altitude, b.altitude, ratio, |x, y| lerp(x, y, ratio)),
        acceleration: lerp_option(a.acceleration, b.acceleration, ratio, |x, y| {
            [lerp(x[0], y[0], ratio), lerp(x[1], y[1], ratio), lerp(x[2], y[2], ratio)]
        }),
    }
}

/// 一个待解析的遥测来源
#[derive(Debug, Clone)]
pub enum TelemetryInput {
    Gpmf(Vec<u8>),
    Camm { data: Vec<u8>, duration: Option<f64> },
    Subtitle(String),
    Gpx(String),
}

impl TelemetryInput {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryInput::Gpmf(_) => TelemetryKind::Gpmf,
            TelemetryInput::Camm { .. } => TelemetryKind::Camm,
            TelemetryInput::Subtitle(_) => TelemetryKind::Subtitle,
            TelemetryInput::Gpx(_) => TelemetryKind::Gpx,
        }
    }

    pub fn parse(&self) -> Result<TelemetryTrack> {
        let samples = match self {
            TelemetryInput::Gpmf(data) => gpmf::parse(data)?,
            TelemetryInput::Camm { data, duration } => camm::parse(data, *duration)?,
            TelemetryInput::Subtitle(text) => srt::parse(text)?,
            TelemetryInput::Gpx(text) => gpx::parse(text)?,
        };
        Ok(TelemetryTrack::from_samples(samples))
    }
}

/// 解析单个来源；失败或为空时记录日志并返回 None
pub(crate) fn parse_logged(input: &TelemetryInput) -> Option<TelemetryTrack> {
    let kind = input.kind();
    match input.parse() {
        Ok(track) if !track.is_empty() => {
            info!("📍 Telemetry: {} samples from {}", track.len(), kind);
            Some(track)
        }
        Ok(_) => {
            warn!("Telemetry source {} contained no GPS samples", kind);
            None
        }
        Err(e) => {
            warn!("Telemetry source {} failed, trying next: {}", kind, e);
            None
        }
    }
}

/// 按固定优先级尝试各来源，第一个解析成功且非空的胜出
pub fn resolve_track(mut inputs: Vec<TelemetryInput>) -> Result<(TelemetryKind, TelemetryTrack)> {
    inputs.sort_by_key(|input| input.kind().priority());

    inputs
        .iter()
        .find_map(|input| parse_logged(input).map(|track| (input.kind(), track)))
        .ok_or(ExtractError::NoTelemetryAvailable)
}
