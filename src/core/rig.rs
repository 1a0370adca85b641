//! 虚拟相机阵列 - 从全景视频中切出的针孔相机朝向
//!
//! Layouts:
//! 1. Ring - 水平等分
//! 2. Cube - 固定六面
//! 3. Fibonacci - 黄金角螺旋，全球面均匀分布
//! 4. Adaptive - 按相机数量自动选择以上三种之一

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::error::{ExtractError, Result};

pub const MIN_CAMERAS: u32 = 2;
pub const MAX_CAMERAS: u32 = 36;
pub const DEFAULT_FOV: f64 = 90.0;

const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;
const CUBE_FACES: [(&str, f64); 4] = [("front", 0.0), ("right", 90.0), ("back", 180.0), ("left", 270.0)];

/// 单个虚拟相机
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub horizontal_fov: f64,
}

impl CameraSpec {
    fn new(name: impl Into<String>, yaw: f64, pitch: f64, horizontal_fov: f64) -> Self {
        Self {
            name: name.into(),
            yaw,
            pitch,
            roll: 0.0,
            horizontal_fov,
        }
    }

    /// Unit view direction in world space (x right, y down, z forward).
    pub fn direction(&self) -> [f64; 3] {
        let yaw = self.yaw.to_radians();
        let pitch = self.pitch.to_radians();
        [yaw.sin() * pitch.cos(), pitch.sin(), yaw.cos() * pitch.cos()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Ring,
    Cube,
    Fibonacci,
    #[default]
    Adaptive,
}

impl LayoutMode {
    /// Adaptive 按数量落到具体布局；其余原样返回
    pub fn resolve(self, count: u32) -> LayoutMode {
        match self {
            LayoutMode::Adaptive if count < 6 => LayoutMode::Ring,
            LayoutMode::Adaptive if count == 6 => LayoutMode::Cube,
            LayoutMode::Adaptive => LayoutMode::Fibonacci,
            other => other,
        }
    }
}

impl std::str::FromStr for LayoutMode {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ring" => Ok(LayoutMode::Ring),
            "cube" => Ok(LayoutMode::Cube),
            "fibonacci" | "fib" => Ok(LayoutMode::Fibonacci),
            "adaptive" => Ok(LayoutMode::Adaptive),
            other => Err(ExtractError::InvalidRigConfig(format!("unknown layout '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub count: u32,
    pub layout: LayoutMode,
    /// Pitch offset applied to horizontal views. Negative looks up.
    pub inclination: f64,
    pub fov: f64,
    pub active_indices: Option<BTreeSet<usize>>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            count: 6,
            layout: LayoutMode::Adaptive,
            inclination: 0.0,
            fov: DEFAULT_FOV,
            active_indices: None,
        }
    }
}

impl RigConfig {
    pub fn new(count: u32, layout: LayoutMode) -> Self {
        Self {
            count,
            layout,
            ..Default::default()
        }
    }

    pub fn with_inclination(mut self, inclination: f64) -> Self {
        self.inclination = inclination;
        self
    }

    pub fn with_fov(mut self, fov: f64) -> Self {
        self.fov = fov;
        self
    }

    pub fn with_active_indices<I: IntoIterator<Item = usize>>(mut self, indices: I) -> Self {
        self.active_indices = Some(indices.into_iter().collect());
        self
    }
}

/// Build the full camera list for a rig, then keep only the active cameras.
///
/// Filtering never renumbers: `view_3` stays `view_3` even if views 0..2 are
/// dropped.
pub fn build_rig(config: &RigConfig) -> Result<Vec<CameraSpec>> {
    if !(MIN_CAMERAS..=MAX_CAMERAS).contains(&config.count) {
        return Err(ExtractError::InvalidRigConfig(format!(
            "camera count {} outside [{}, {}]",
            config.count, MIN_CAMERAS, MAX_CAMERAS
        )));
    }
    if !(config.fov > 0.0 && config.fov < 180.0) {
        return Err(ExtractError::InvalidRigConfig(format!(
            "field of view {} outside (0, 180)",
            config.fov
        )));
    }

    let cameras = match config.layout.resolve(config.count) {
        LayoutMode::Ring => ring(config.count, config.inclination, config.fov),
        LayoutMode::Cube => cube(config.inclination, config.fov),
        LayoutMode::Fibonacci => fibonacci(config.count, config.fov),
        LayoutMode::Adaptive => unreachable!("adaptive layout is resolved above"),
    };

    let Some(active) = &config.active_indices else {
        return Ok(cameras);
    };

    if let Some(bad) = active.iter().find(|&&i| i >= cameras.len()) {
        return Err(ExtractError::InvalidRigConfig(format!(
            "active camera index {} out of range (rig has {} cameras)",
            bad,
            cameras.len()
        )));
    }
    if active.is_empty() {
        return Err(ExtractError::InvalidRigConfig("no active cameras selected".to_string()));
    }

    Ok(cameras
        .into_iter()
        .enumerate()
        .filter(|(i, _)| active.contains(i))
        .map(|(_, cam)| cam)
        .collect())
}

fn ring(count: u32, inclination: f64, fov: f64) -> Vec<CameraSpec> {
    let step = 360.0 / count as f64;
    (0..count)
        .map(|i| CameraSpec::new(format!("view_{}", i), i as f64 * step, inclination, fov))
        .collect()
}

fn cube(inclination: f64, fov: f64) -> Vec<CameraSpec> {
    let mut cameras: Vec<CameraSpec> = CUBE_FACES
        .iter()
        .map(|&(name, yaw)| CameraSpec::new(name, yaw, inclination, fov))
        .collect();
    cameras.push(CameraSpec::new("up", 0.0, -90.0, fov));
    cameras.push(CameraSpec::new("down", 0.0, 90.0, fov));
    cameras
}

fn fibonacci(count: u32, fov: f64) -> Vec<CameraSpec> {
    let n = count as f64;
    (0..count)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n;
            let pitch = z.clamp(-1.0, 1.0).acos().to_degrees() - 90.0;
            let yaw = (i as f64 * 360.0 / GOLDEN_RATIO).rem_euclid(360.0);
            CameraSpec::new(format!("view_{}", i), yaw, pitch, fov)
        })
        .collect()
}
