//! 模糊检测 - 拉普拉斯方差

use std::collections::{HashMap, VecDeque};

use image::{GrayImage, RgbImage};
use log::{debug, warn};

use super::decision::{DecisionReason, ExtractionDecision};
use super::frame::to_grayscale;

pub const DEFAULT_BLUR_THRESHOLD: f32 = 100.0;
pub const MAX_BLUR_THRESHOLD: f32 = 1000.0;

const SMART_HISTORY_LEN: usize = 10;
const SMART_RELATIVE_FLOOR: f32 = 0.6;
const SMART_MAX_CONSECUTIVE_SKIPS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct BlurGateConfig {
    pub threshold: f32,
    /// 按相机记录历史分数，相对均值判断模糊
    pub smart: bool,
}

impl Default for BlurGateConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BLUR_THRESHOLD,
            smart: false,
        }
    }
}

impl BlurGateConfig {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, MAX_BLUR_THRESHOLD),
            ..Default::default()
        }
    }

    pub fn smart(mut self) -> Self {
        self.smart = true;
        self
    }
}

/// 3x3 拉普拉斯响应的方差（只计算内部像素）
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let (w, h) = (w as usize, h as usize);
    let data = gray.as_raw();

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let lap = data[i - w] as f64 + data[i + w] as f64 + data[i - 1] as f64 + data[i + 1] as f64
                - 4.0 * data[i] as f64;
            sum += lap;
            sum_sq += lap * lap;
            n += 1;
        }
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0) as f32
}

/// 单张图的固定阈值判断
pub fn evaluate_image(image: &RgbImage, threshold: f32) -> ExtractionDecision {
    let score = laplacian_variance(&to_grayscale(image));
    if score < threshold {
        ExtractionDecision::skip(DecisionReason::Blurry, score)
    } else {
        ExtractionDecision::keep(DecisionReason::ForcedInterval, score)
    }
}

#[derive(Debug, Default)]
struct CameraHistory {
    scores: VecDeque<f32>,
    consecutive_skips: u32,
}

impl CameraHistory {
    fn mean(&self) -> Option<f32> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.iter().sum::<f32>() / self.scores.len() as f32)
        }
    }

    fn accept(&mut self, score: f32) {
        if self.scores.len() == SMART_HISTORY_LEN {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
        self.consecutive_skips = 0;
    }
}

/// 逐相机模糊门控；smart 模式下每个相机单独维护历史
pub struct BlurGate {
    config: BlurGateConfig,
    history: HashMap<String, CameraHistory>,
}

impl BlurGate {
    pub fn new(config: BlurGateConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    pub fn config(&self) -> &BlurGateConfig {
        &self.config
    }

    /// `upstream` 是帧级决策原因（运动/强制），保留时沿用
    pub fn evaluate(&mut self, camera: &str, image: &RgbImage, upstream: DecisionReason) -> ExtractionDecision {
        let score = laplacian_variance(&to_grayscale(image));

        if !self.config.smart {
            let decision = if score < self.config.threshold {
                ExtractionDecision::skip(DecisionReason::Blurry, score)
            } else {
                ExtractionDecision::keep(upstream, score)
            };
            debug!("blur gate {}: score {:.1} extract={}", camera, score, decision.extract);
            return decision;
        }

        let entry = self.history.entry(camera.to_string()).or_default();
        let below_floor = score < self.config.threshold;
        let below_history = entry
            .mean()
            .map_or(false, |mean| score < mean * SMART_RELATIVE_FLOOR);

        if (below_floor || below_history) && entry.consecutive_skips < SMART_MAX_CONSECUTIVE_SKIPS {
            entry.consecutive_skips += 1;
            debug!(
                "blur gate {}: score {:.1} blurry ({} in a row)",
                camera, score, entry.consecutive_skips
            );
            return ExtractionDecision::skip(DecisionReason::Blurry, score);
        }

        if below_floor || below_history {
            warn!("blur gate {}: forcing accept after {} blurry views", camera, entry.consecutive_skips);
        }
        entry.accept(score);
        ExtractionDecision::keep(upstream, score)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
