//! GPX 旁车文件解析

use chrono::DateTime;
use log::debug;
use scraper::{ElementRef, Html, Selector};

use super::{TelemetryKind, TelemetrySample};
use crate::core::error::{ExtractError, Result};

fn parse_error(reason: impl Into<String>) -> ExtractError {
    ExtractError::telemetry(TelemetryKind::Gpx, reason)
}

/// Text of the first direct child element named `name`.
///
/// Only direct children are inspected: the markup parser nests sibling
/// `trkpt` elements written in self-closing form.
fn child_text(point: &ElementRef<'_>, name: &str) -> Option<String> {
    point
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name().eq_ignore_ascii_case(name))
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// 解析 GPX 轨迹点；时间相对第一个带时间的点，没有时间的点跳过
///
/// The file goes through an HTML tree builder, not an XML parser. `<link>` is
/// treated as a void element (its `<text>` child becomes a sibling) and
/// self-closing non-void tags are not closed. Only `trkpt` attributes and their
/// direct `ele`/`time` children are read, so both quirks leave points intact.
pub fn parse(text: &str) -> Result<Vec<TelemetrySample>> {
    if !text.to_ascii_lowercase().contains("<gpx") {
        return Err(parse_error("missing <gpx> root element"));
    }

    let document = Html::parse_document(text);
    let trkpt_selector = Selector::parse("trkpt").map_err(|_| parse_error("invalid trkpt selector"))?;

    let mut samples = Vec::new();
    let mut start: Option<f64> = None;
    let mut skipped = 0usize;

    for point in document.select(&trkpt_selector) {
        let attr = |name: &str| point.value().attr(name).and_then(|v| v.trim().parse::<f64>().ok());
        let (Some(lat), Some(lon)) = (attr("lat"), attr("lon")) else {
            skipped += 1;
            continue;
        };

        let Some(time) = child_text(&point, "time")
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        else {
            skipped += 1;
            continue;
        };
        let epoch = time.timestamp_millis() as f64 / 1000.0;
        let origin = *start.get_or_insert(epoch);

        let mut sample = TelemetrySample::new(epoch - origin, lat, lon);
        if let Some(ele) = child_text(&point, "ele").and_then(|e| e.parse::<f64>().ok()) {
            sample = sample.with_altitude(ele);
        }
        samples.push(sample);
    }

    debug!("GPX: {} track points, {} skipped", samples.len(), skipped);
    Ok(samples)
}
