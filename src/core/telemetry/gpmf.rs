//! GoPro GPMF 解析（`gpmd` 数据流）
//!
//! KLV layout: `FourCC | type u8 | struct size u8 | repeat u16 BE | payload`,
//! payload padded to 4 bytes. Type 0 means the payload is itself a KLV list.
//! Each top-level `DEVC` covers roughly one second of video.

use log::debug;

use super::{is_plausible_fix, TelemetryKind, TelemetrySample};
use crate::core::error::{ExtractError, Result};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Klv<'a> {
    fourcc: [u8; 4],
    type_char: u8,
    size: usize,
    repeat: usize,
    payload: &'a [u8],
}

impl<'a> Klv<'a> {
    fn is(&self, name: &[u8; 4]) -> bool {
        &self.fourcc == name
    }

    fn records(&self) -> std::slice::ChunksExact<'a, u8> {
        self.payload.chunks_exact(self.size.max(1))
    }

    fn children(&self) -> Result<Vec<Klv<'a>>> {
        read_klvs(self.payload)
    }

    /// Decode every numeric element of the payload as f64.
    fn numbers(&self) -> Vec<f64> {
        let width = match self.type_char {
            b'b' | b'B' => 1,
            b's' | b'S' => 2,
            b'l' | b'L' | b'f' => 4,
            b'd' | b'j' | b'J' => 8,
            _ => return Vec::new(),
        };
        self.payload[..self.size * self.repeat]
            .chunks_exact(width)
            .map(|c| match self.type_char {
                b'b' => c[0] as i8 as f64,
                b'B' => c[0] as f64,
                b's' => i16::from_be_bytes([c[0], c[1]]) as f64,
                b'S' => u16::from_be_bytes([c[0], c[1]]) as f64,
                b'l' => i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64,
                b'L' => u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64,
                b'f' => f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64,
                b'd' => f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
                b'j' => i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
                _ => u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
            })
            .collect()
    }
}

fn parse_error(reason: impl Into<String>) -> ExtractError {
    ExtractError::telemetry(TelemetryKind::Gpmf, reason)
}

fn read_klvs(data: &[u8]) -> Result<Vec<Klv<'_>>> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset + HEADER_LEN <= data.len() {
        let header = &data[offset..offset + HEADER_LEN];
        let fourcc = [header[0], header[1], header[2], header[3]];
        // 零填充的尾部
        if fourcc == [0; 4] {
            break;
        }
        let size = header[5] as usize;
        let repeat = u16::from_be_bytes([header[6], header[7]]) as usize;
        let len = size * repeat;
        let start = offset + HEADER_LEN;
        if start + len > data.len() {
            return Err(parse_error(format!(
                "KLV {} truncated at offset {}",
                String::from_utf8_lossy(&fourcc),
                offset
            )));
        }
        out.push(Klv {
            fourcc,
            type_char: header[4],
            size,
            repeat,
            payload: &data[start..start + len],
        });
        offset = start + ((len + 3) & !3);
    }

    if offset < data.len() && out.is_empty() {
        return Err(parse_error(format!("{} bytes without a KLV header", data.len())));
    }
    Ok(out)
}

/// Per-field scale; a single SCAL value applies to every field.
fn scale(scal: &[f64], field: usize) -> f64 {
    let s = scal.get(field).or_else(|| scal.first()).copied().unwrap_or(1.0);
    if s == 0.0 {
        1.0
    } else {
        s
    }
}

#[derive(Debug, Default)]
struct StreamData {
    fixes: Vec<(f64, f64, f64)>,
    accel: Vec<[f64; 3]>,
}

fn read_stream(strm: &Klv<'_>) -> Result<StreamData> {
    let mut data = StreamData::default();
    let mut scal: Vec<f64> = Vec::new();
    let mut fix_type: Option<f64> = None;

    for klv in strm.children()? {
        match &klv.fourcc {
            b"SCAL" => scal = klv.numbers(),
            b"GPSF" => fix_type = klv.numbers().first().copied(),
            b"GPS5" => {
                if fix_type == Some(0.0) {
                    continue;
                }
                for rec in klv.records().filter(|r| r.len() >= 12) {
                    let v = be_i32s(rec, 3);
                    data.fixes.push((v[0] / scale(&scal, 0), v[1] / scale(&scal, 1), v[2] / scale(&scal, 2)));
                }
            }
            b"GPS9" => {
                for rec in klv.records().filter(|r| r.len() >= 12) {
                    // lat, lon, alt, speed2d, speed3d, days, secs (i32) | dop, fix (u16)
                    if rec.len() >= 32 && u16::from_be_bytes([rec[30], rec[31]]) == 0 {
                        continue;
                    }
                    let v = be_i32s(rec, 3);
                    data.fixes.push((v[0] / scale(&scal, 0), v[1] / scale(&scal, 1), v[2] / scale(&scal, 2)));
                }
            }
            b"ACCL" => {
                for rec in klv.records().filter(|r| r.len() >= 6) {
                    let zxy: Vec<f64> = rec[..6]
                        .chunks_exact(2)
                        .enumerate()
                        .map(|(i, c)| i16::from_be_bytes([c[0], c[1]]) as f64 / scale(&scal, i))
                        .collect();
                    data.accel.push([zxy[1], zxy[2], zxy[0]]);
                }
            }
            _ => {}
        }
    }
    Ok(data)
}

fn be_i32s(rec: &[u8], count: usize) -> Vec<f64> {
    rec.chunks_exact(4)
        .take(count)
        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect()
}

/// 解析整条 GPMF 流
pub fn parse(data: &[u8]) -> Result<Vec<TelemetrySample>> {
    let top = read_klvs(data)?;
    let payloads: Vec<&Klv<'_>> = top.iter().filter(|k| k.is(b"DEVC")).collect();
    if payloads.is_empty() {
        return Err(parse_error("no DEVC payloads"));
    }

    let mut samples = Vec::new();
    for (second, devc) in payloads.iter().enumerate() {
        let mut fixes = Vec::new();
        let mut accel = Vec::new();
        for strm in devc.children()?.iter().filter(|k| k.is(b"STRM")) {
            let stream = read_stream(strm)?;
            fixes.extend(stream.fixes);
            accel.extend(stream.accel);
        }

        let n = fixes.len();
        for (j, (lat, lon, alt)) in fixes.into_iter().enumerate() {
            if !is_plausible_fix(lat, lon) {
                continue;
            }
            let t = second as f64 + j as f64 / n as f64;
            let mut sample = TelemetrySample::new(t, lat, lon).with_altitude(alt);
            if !accel.is_empty() {
                sample = sample.with_acceleration(accel[j * accel.len() / n]);
            }
            samples.push(sample);
        }
    }

    debug!("GPMF: {} payloads, {} GPS samples", payloads.len(), samples.len());
    Ok(samples)
}
