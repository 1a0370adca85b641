//! DJI 字幕遥测（SRT）

use once_cell::sync::Lazy;
use regex::Regex;

use super::{is_plausible_fix, TelemetryKind, TelemetrySample};
use crate::core::error::{ExtractError, Result};

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static TIMING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->").expect("valid timing regex"));
static LAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\[\s*latitude\s*:\s*{}", NUM)).expect("valid latitude regex"));
// 部分固件拼写为 longtitude
static LON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\[\s*long?t?itude\s*:\s*{}", NUM)).expect("valid longitude regex")
});
static ABS_ALT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)abs_alt\s*:\s*{}", NUM)).expect("valid abs_alt regex"));
static ALT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\[\s*altitude\s*:\s*{}", NUM)).expect("valid altitude regex"));
static LEGACY_GPS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"GPS\s*\(\s*{}\s*,\s*{}(?:\s*,\s*{})?", NUM, NUM, NUM))
        .expect("valid legacy GPS regex")
});

fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn block_start_secs(caps: &regex::Captures<'_>) -> Option<f64> {
    let h: f64 = caps.get(1)?.as_str().parse().ok()?;
    let m: f64 = caps.get(2)?.as_str().parse().ok()?;
    let s: f64 = caps.get(3)?.as_str().parse().ok()?;
    let frac = caps.get(4)?.as_str();
    let ms: f64 = frac.parse::<f64>().ok()? * 10f64.powi(3 - frac.len() as i32);
    Some(h * 3600.0 + m * 60.0 + s + ms / 1000.0)
}

/// Coordinates from one subtitle body: bracketed tags first, legacy `GPS(lon,lat,alt)` second.
fn parse_fix(text: &str) -> Option<(f64, f64, Option<f64>)> {
    if let (Some(lat), Some(lon)) = (capture_f64(&LAT_RE, text), capture_f64(&LON_RE, text)) {
        let alt = capture_f64(&ABS_ALT_RE, text).or_else(|| capture_f64(&ALT_RE, text));
        return Some((lat, lon, alt));
    }

    let caps = LEGACY_GPS_RE.captures(text)?;
    let lon: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lat: f64 = caps.get(2)?.as_str().parse().ok()?;
    let alt = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some((lat, lon, alt))
}

/// 解析 SRT 文本；时间戳取字幕块起始时间
pub fn parse(text: &str) -> Result<Vec<TelemetrySample>> {
    let normalized = text.replace("\r\n", "\n");
    let mut samples = Vec::new();
    let mut blocks = 0usize;

    for block in normalized.split("\n\n") {
        let Some(caps) = TIMING_RE.captures(block) else {
            continue;
        };
        let Some(start) = block_start_secs(&caps) else {
            continue;
        };
        blocks += 1;

        // 时间行之后的正文
        let body_at = caps.get(0).map_or(0, |m| m.end());
        let body = &block[body_at..];
        if let Some((lat, lon, alt)) = parse_fix(body) {
            if !is_plausible_fix(lat, lon) {
                continue;
            }
            let sample = TelemetrySample::new(start, lat, lon);
            samples.push(match alt {
                Some(a) => sample.with_altitude(a),
                None => sample,
            });
        }
    }

    if blocks == 0 {
        return Err(ExtractError::telemetry(TelemetryKind::Subtitle, "no subtitle blocks found"));
    }
    Ok(samples)
}
