//! 运动门控 - 自适应关键帧
//!
//! 与上一个保留帧做稠密光流（金字塔 Lucas-Kanade），平均光流幅度超过阈值才提取。

use log::debug;
use rayon::prelude::*;

use super::decision::{DecisionReason, ExtractionDecision};
use super::frame::{to_grayscale, Frame};
use crate::core::error::Result;

pub const DEFAULT_MOTION_THRESHOLD: f32 = 5.0;
pub const MAX_MOTION_THRESHOLD: f32 = 100.0;

const MIN_PYRAMID_SIZE: usize = 16;
const MIN_EIGEN_PER_PIXEL: f32 = 1e-2;
const CONVERGENCE_EPS: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct MotionGateConfig {
    pub threshold: f32,
    pub sample_size: (u32, u32),
    pub pyramid_levels: usize,
    pub window_radius: usize,
    pub max_iterations: usize,
}

impl Default for MotionGateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MOTION_THRESHOLD,
            sample_size: (160, 80),
            pyramid_levels: 3,
            window_radius: 2,
            max_iterations: 5,
        }
    }
}

impl MotionGateConfig {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, MAX_MOTION_THRESHOLD),
            ..Default::default()
        }
    }
}

/// 灰度平面（浮点）
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn at(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    fn sample(&self, fx: f32, fy: f32) -> f32 {
        let fx = fx.clamp(0.0, (self.width - 1) as f32);
        let fy = fy.clamp(0.0, (self.height - 1) as f32);
        let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let (ax, ay) = (fx - x0 as f32, fy - y0 as f32);
        let row0 = y0 * self.width;
        let row1 = y1 * self.width;
        let top = self.data[row0 + x0] * (1.0 - ax) + self.data[row0 + x1] * ax;
        let bottom = self.data[row1 + x0] * (1.0 - ax) + self.data[row1 + x1] * ax;
        top * (1.0 - ay) + bottom * ay
    }

    /// 2x2 均值下采样
    fn downsample(&self) -> Plane {
        let (w, h) = (self.width / 2, self.height / 2);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let i = 2 * y * self.width + 2 * x;
                let sum = self.data[i] + self.data[i + 1] + self.data[i + self.width] + self.data[i + self.width + 1];
                data.push(sum / 4.0);
            }
        }
        Plane { width: w, height: h, data }
    }

    fn pyramid(self, levels: usize) -> Vec<Plane> {
        let mut out = vec![self];
        while out.len() < levels {
            let last = &out[out.len() - 1];
            if last.width.min(last.height) < MIN_PYRAMID_SIZE {
                break;
            }
            let next = last.downsample();
            out.push(next);
        }
        out
    }
}

pub struct MotionGate {
    config: MotionGateConfig,
    reference: Option<Plane>,
}

impl MotionGate {
    pub fn new() -> Self {
        Self::with_config(MotionGateConfig::default())
    }

    pub fn with_config(config: MotionGateConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    pub fn config(&self) -> &MotionGateConfig {
        &self.config
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// 评估候选帧；保留时替换参考帧
    pub fn evaluate(&mut self, frame: &Frame) -> Result<ExtractionDecision> {
        let current = self.prepare(frame)?;

        let Some(reference) = &self.reference else {
            self.reference = Some(current);
            return Ok(ExtractionDecision::keep(DecisionReason::ForcedInterval, 0.0));
        };

        let score = mean_flow_magnitude(reference, &current, &self.config);
        debug!(
            "motion gate frame {}: score {:.3} (threshold {:.3})",
            frame.frame_number, score, self.config.threshold
        );

        if score > self.config.threshold {
            self.reference = Some(current);
            Ok(ExtractionDecision::keep(DecisionReason::Motion, score))
        } else {
            Ok(ExtractionDecision::skip(DecisionReason::DuplicateSkip, score))
        }
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    fn prepare(&self, frame: &Frame) -> Result<Plane> {
        let (w, h) = self.config.sample_size;
        let small = frame.resize_to(w, h)?;
        let gray = to_grayscale(&small);
        Ok(Plane {
            width: w as usize,
            height: h as usize,
            data: gray.into_raw().into_iter().map(f32::from).collect(),
        })
    }
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// 稠密金字塔 LK 光流的平均幅度
fn mean_flow_magnitude(prev: &Plane, next: &Plane, config: &MotionGateConfig) -> f32 {
    let prev_pyr = prev.clone().pyramid(config.pyramid_levels);
    let next_pyr = next.clone().pyramid(config.pyramid_levels);

    let mut flow: Vec<[f32; 2]> = Vec::new();
    let mut flow_w = 0usize;

    for (p, n) in prev_pyr.iter().zip(next_pyr.iter()).rev() {
        flow = if flow.is_empty() {
            vec![[0.0, 0.0]; p.width * p.height]
        } else {
            upsample_flow(&flow, flow_w, p.width, p.height)
        };
        flow_w = p.width;
        flow = refine_level(p, n, &flow, config);
    }

    if flow.is_empty() {
        return 0.0;
    }
    let total: f32 = flow.iter().map(|[u, v]| (u * u + v * v).sqrt()).sum();
    total / flow.len() as f32
}

/// 最近邻上采样，位移乘 2
fn upsample_flow(flow: &[[f32; 2]], coarse_w: usize, width: usize, height: usize) -> Vec<[f32; 2]> {
    let coarse_h = flow.len() / coarse_w;
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        let cy = (y / 2).min(coarse_h - 1);
        for x in 0..width {
            let cx = (x / 2).min(coarse_w - 1);
            let [u, v] = flow[cy * coarse_w + cx];
            out.push([u * 2.0, v * 2.0]);
        }
    }
    out
}

fn refine_level(prev: &Plane, next: &Plane, guess: &[[f32; 2]], config: &MotionGateConfig) -> Vec<[f32; 2]> {
    let (w, h) = (prev.width, prev.height);
    let r = config.window_radius;

    let mut ix = vec![0.0f32; w * h];
    let mut iy = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            ix[y * w + x] = (prev.at(xi + 1, yi) - prev.at(xi - 1, yi)) / 2.0;
            iy[y * w + x] = (prev.at(xi, yi + 1) - prev.at(xi, yi - 1)) / 2.0;
        }
    }

    let mut out = vec![[0.0f32; 2]; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let (y_lo, y_hi) = (y.saturating_sub(r), (y + r + 1).min(h));
        for (x, cell) in row.iter_mut().enumerate() {
            let (x_lo, x_hi) = (x.saturating_sub(r), (x + r + 1).min(w));

            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for wy in y_lo..y_hi {
                for wx in x_lo..x_hi {
                    let (gx, gy) = (ix[wy * w + wx], iy[wy * w + wx]);
                    a += gx * gx;
                    b += gx * gy;
                    c += gy * gy;
                }
            }
            let count = ((y_hi - y_lo) * (x_hi - x_lo)) as f32;
            let det = a * c - b * b;
            let min_eigen = (a + c) / 2.0 - (((a - c) / 2.0).powi(2) + b * b).sqrt();

            let [mut u, mut v] = guess[y * w + x];
            // 纹理不足，保留上层估计
            if min_eigen < MIN_EIGEN_PER_PIXEL * count || det.abs() < 1e-9 {
                *cell = [u, v];
                continue;
            }

            for _ in 0..config.max_iterations {
                let (mut bx, mut by) = (0.0f32, 0.0f32);
                for wy in y_lo..y_hi {
                    for wx in x_lo..x_hi {
                        let i = wy * w + wx;
                        let it = prev.data[i] - next.sample(wx as f32 + u, wy as f32 + v);
                        bx += ix[i] * it;
                        by += iy[i] * it;
                    }
                }
                let du = (c * bx - b * by) / det;
                let dv = (a * by - b * bx) / det;
                u += du;
                v += dv;
                if du * du + dv * dv < CONVERGENCE_EPS {
                    break;
                }
            }
            *cell = [u, v];
        }
    });
    out
}
