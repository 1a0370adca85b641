//! CAMM 解析（Insta360 布局）
//!
//! Little-endian packets `reserved u16 | type u16 | payload`. Only the
//! packet types observed in Insta360 files are sized; anything else is
//! skipped by scanning forward for the next plausible header.

use log::{debug, warn};

use super::{is_plausible_fix, TelemetryKind, TelemetrySample};
use crate::core::error::{ExtractError, Result};

/// 时长未知时假定 5 Hz
const FALLBACK_INTERVAL_SECS: f64 = 0.2;
const RESYNC_TYPES: [u16; 4] = [1, 2, 3, 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketType {
    Empty,
    Exposure,
    Gyro,
    Accel,
    Gps,
}

impl PacketType {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(PacketType::Empty),
            1 => Some(PacketType::Exposure),
            2 => Some(PacketType::Gyro),
            3 => Some(PacketType::Accel),
            6 => Some(PacketType::Gps),
            _ => None,
        }
    }

    fn payload_len(self) -> usize {
        match self {
            PacketType::Empty => 0,
            PacketType::Exposure => 8,
            PacketType::Gyro | PacketType::Accel => 12,
            PacketType::Gps => 20,
        }
    }
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_f32(data: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_f64(data: &[u8], at: usize) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    f64::from_le_bytes(buf)
}

/// 从 `from` 开始找下一个 `00 00 <type>` 头
fn resync(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(4)).find(|&i| {
        read_u16(data, i) == 0 && RESYNC_TYPES.contains(&read_u16(data, i + 2))
    })
}

/// 解析 CAMM 数据流；时间戳按容器时长均匀分布
pub fn parse(data: &[u8], duration: Option<f64>) -> Result<Vec<TelemetrySample>> {
    if data.len() < 4 {
        return Err(ExtractError::telemetry(
            TelemetryKind::Camm,
            format!("stream too short ({} bytes)", data.len()),
        ));
    }

    let mut fixes: Vec<(f64, f64, f64, Option<[f64; 3]>)> = Vec::new();
    let mut pending_accel: Option<[f64; 3]> = None;
    let mut offset = 0;
    let mut resyncs = 0usize;

    while offset + 4 <= data.len() {
        let header_at = offset;
        let code = read_u16(data, offset + 2);
        offset += 4;

        let Some(kind) = PacketType::from_code(code) else {
            resyncs += 1;
            match resync(data, header_at + 1) {
                Some(next) => {
                    offset = next;
                    continue;
                }
                None => break,
            }
        };

        let len = kind.payload_len();
        if offset + len > data.len() {
            break;
        }

        match kind {
            PacketType::Gps => {
                let lat = read_f64(data, offset);
                let lon = read_f64(data, offset + 8);
                let alt = read_f32(data, offset + 16) as f64;
                if is_plausible_fix(lat, lon) {
                    fixes.push((lat, lon, alt, pending_accel.take()));
                }
            }
            PacketType::Accel => {
                pending_accel = Some([
                    read_f32(data, offset) as f64,
                    read_f32(data, offset + 4) as f64,
                    read_f32(data, offset + 8) as f64,
                ]);
            }
            _ => {}
        }
        offset += len;
    }

    if resyncs > 0 {
        debug!("CAMM: resynchronised {} times", resyncs);
    }

    let n = fixes.len();
    let step = match duration {
        Some(d) if d > 0.0 && n > 0 => d / n as f64,
        _ => {
            if n > 0 {
                warn!("CAMM stream has no duration, assuming 5 Hz GPS");
            }
            FALLBACK_INTERVAL_SECS
        }
    };

    Ok(fixes
        .into_iter()
        .enumerate()
        .map(|(i, (lat, lon, alt, accel))| {
            let sample = TelemetrySample::new(i as f64 * step, lat, lon).with_altitude(alt);
            match accel {
                Some(a) => sample.with_acceleration(a),
                None => sample,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(code: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = 0u16.to_le_bytes().to_vec();
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn gps(lat: f64, lon: f64, alt: f32) -> Vec<u8> {
        let mut p = lat.to_le_bytes().to_vec();
        p.extend_from_slice(&lon.to_le_bytes());
        p.extend_from_slice(&alt.to_le_bytes());
        packet(6, &p)
    }

    fn vec3(code: u16, v: [f32; 3]) -> Vec<u8> {
        let p: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
        packet(code, &p)
    }

    #[test]
    fn test_gps_with_duration() {
        let data = [
            gps(22.0, 114.0, 10.0),
            vec3(2, [0.1, 0.2, 0.3]),
            packet(1, &[0u8; 8]),
            gps(22.1, 114.1, 11.0),
            packet(0, &[]),
            gps(22.2, 114.2, 12.0),
        ]
        .concat();

        let samples = parse(&data, Some(3.0)).unwrap();
        assert_eq!(samples.len(), 3);
        let times: Vec<f64> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        assert_eq!(samples[1].latitude, 22.1);
        assert_eq!(samples[2].altitude, Some(12.0));
    }

    #[test]
    fn test_five_hz_without_duration() {
        let data = [gps(1.0, 2.0, 0.0), gps(1.1, 2.1, 0.0)].concat();
        let samples = parse(&data, None).unwrap();
        assert_eq!(samples[1].timestamp, 0.2);
    }

    #[test]
    fn test_invalid_fixes_dropped() {
        let data = [gps(0.0, 0.0, 0.0), gps(95.0, 10.0, 0.0), gps(45.0, 7.0, 300.0)].concat();
        let samples = parse(&data, None).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].latitude, 45.0);
    }

    #[test]
    fn test_accel_attached_to_next_fix() {
        let data = [vec3(3, [1.0, 2.0, 9.5]), gps(45.0, 7.0, 0.0), gps(45.1, 7.1, 0.0)].concat();
        let samples = parse(&data, Some(2.0)).unwrap();
        assert_eq!(samples[0].acceleration, Some([1.0, 2.0, 9.5]));
        assert_eq!(samples[1].acceleration, None);
    }

    #[test]
    fn test_resync_after_unknown_type() {
        let data = [
            gps(45.0, 7.0, 0.0),
            packet(9, &[0xAB, 0xCD, 0xEF]),
            gps(45.1, 7.1, 0.0),
        ]
        .concat();
        let samples = parse(&data, None).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].longitude, 7.1);
    }

    #[test]
    fn test_short_stream_rejected() {
        assert!(matches!(
            parse(&[0, 0], None),
            Err(ExtractError::TelemetryParse { source_kind: TelemetryKind::Camm, .. })
        ));
    }
}
