//! 等距柱状 → 针孔透视投影
//!
//! Camera space: x right, y down, z forward. A camera's orientation is
//! `R = R_yaw · R_pitch · R_roll`; positive pitch looks down.

use log::debug;
use rayon::prelude::*;

use image::RgbImage;

use crate::core::error::{ExtractError, Result};
use crate::core::rig::CameraSpec;
use crate::core::video::frame::{Frame, ProjectedFrame};

type Mat3 = [[f64; 3]; 3];

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn mat_apply(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Camera-to-world rotation for a rig camera.
pub fn rotation(camera: &CameraSpec) -> Mat3 {
    let (sy, cy) = camera.yaw.to_radians().sin_cos();
    let (sp, cp) = camera.pitch.to_radians().sin_cos();
    let (sr, cr) = camera.roll.to_radians().sin_cos();

    let r_yaw = [[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]];
    let r_pitch = [[1.0, 0.0, 0.0], [0.0, cp, sp], [0.0, -sp, cp]];
    let r_roll = [[cr, -sr, 0.0], [sr, cr, 0.0], [0.0, 0.0, 1.0]];

    mat_mul(&mat_mul(&r_yaw, &r_pitch), &r_roll)
}

/// World direction → (longitude°, latitude°). Latitude is positive above the horizon.
pub fn direction_to_lon_lat(d: [f64; 3]) -> (f64, f64) {
    let norm = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    let lon = d[0].atan2(d[2]).to_degrees();
    let lat = (-d[1] / norm).clamp(-1.0, 1.0).asin().to_degrees();
    (lon, lat)
}

/// 预计算的采样坐标表，每个输出像素一个 (x, y) 源坐标
#[derive(Debug, Clone)]
pub struct ProjectionMap {
    source_size: (u32, u32),
    output_size: (u32, u32),
    coords: Vec<[f32; 2]>,
}

impl ProjectionMap {
    pub fn new(camera: &CameraSpec, source_size: (u32, u32), output_size: (u32, u32)) -> Result<Self> {
        let (src_w, src_h) = source_size;
        let (out_w, out_h) = output_size;
        if src_w == 0 || src_h == 0 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "source size {}x{}",
                src_w, src_h
            )));
        }
        if out_w == 0 || out_h == 0 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "output size {}x{}",
                out_w, out_h
            )));
        }
        if !(camera.horizontal_fov > 0.0 && camera.horizontal_fov < 180.0) {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "camera {} field of view {}",
                camera.name, camera.horizontal_fov
            )));
        }

        let focal = (out_w as f64 / 2.0) / (camera.horizontal_fov.to_radians() / 2.0).tan();
        let (cx, cy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);
        let rot = rotation(camera);
        let (w_f, h_f) = (src_w as f64, src_h as f64);

        let mut coords = vec![[0.0f32; 2]; out_w as usize * out_h as usize];
        coords
            .par_chunks_mut(out_w as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    let ray = [(x as f64 + 0.5 - cx) / focal, (y as f64 + 0.5 - cy) / focal, 1.0];
                    let (lon, lat) = direction_to_lon_lat(mat_apply(&rot, ray));
                    let u = (lon + 180.0) / 360.0 * w_f;
                    let v = (90.0 - lat) / 180.0 * h_f;
                    *cell = [(u - 0.5) as f32, (v - 0.5) as f32];
                }
            });

        debug!(
            "projection map for {}: {}x{} -> {}x{}",
            camera.name, src_w, src_h, out_w, out_h
        );

        Ok(Self {
            source_size,
            output_size,
            coords,
        })
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    /// 源坐标（像素中心为整数）
    pub fn sample_coords(&self, x: u32, y: u32) -> Option<[f32; 2]> {
        if x >= self.output_size.0 || y >= self.output_size.1 {
            return None;
        }
        self.coords
            .get(y as usize * self.output_size.0 as usize + x as usize)
            .copied()
    }

    pub fn apply(&self, frame: &Frame) -> Result<RgbImage> {
        frame.validate()?;
        if (frame.width, frame.height) != self.source_size {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "frame {}x{} does not match projection map source {}x{}",
                frame.width, frame.height, self.source_size.0, self.source_size.1
            )));
        }

        let (out_w, out_h) = self.output_size;
        let row_len = out_w as usize * 3;
        let mut out = vec![0u8; row_len * out_h as usize];

        out.par_chunks_mut(row_len)
            .zip(self.coords.par_chunks(out_w as usize))
            .for_each(|(row, coords)| {
                for (px, &[sx, sy]) in row.chunks_exact_mut(3).zip(coords.iter()) {
                    px.copy_from_slice(&bilinear(&frame.data, frame.width, frame.height, sx, sy));
                }
            });

        RgbImage::from_raw(out_w, out_h, out)
            .ok_or_else(|| ExtractError::InvalidFrameGeometry("output buffer mismatch".to_string()))
    }
}

/// 双线性采样：水平方向环绕，垂直方向截断
fn bilinear(data: &[u8], width: u32, height: u32, sx: f32, sy: f32) -> [u8; 3] {
    let w = width as i64;
    let max_y = (height - 1) as f32;

    let x_floor = sx.floor();
    let fx = sx - x_floor;
    let x0 = (x_floor as i64).rem_euclid(w) as usize;
    let x1 = (x_floor as i64 + 1).rem_euclid(w) as usize;

    let sy = sy.clamp(0.0, max_y);
    let y_floor = sy.floor();
    let fy = sy - y_floor;
    let y0 = y_floor as usize;
    let y1 = (y0 + 1).min(height as usize - 1);

    let stride = width as usize * 3;
    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let p00 = data[y0 * stride + x0 * 3 + c] as f32;
        let p10 = data[y0 * stride + x1 * 3 + c] as f32;
        let p01 = data[y1 * stride + x0 * 3 + c] as f32;
        let p11 = data[y1 * stride + x1 * 3 + c] as f32;
        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        *value = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// 单帧单相机投影（不缓存坐标表）
pub fn project(frame: &Frame, camera: &CameraSpec, output_size: (u32, u32)) -> Result<ProjectedFrame> {
    let map = ProjectionMap::new(camera, (frame.width, frame.height), output_size)?;
    Ok(ProjectedFrame {
        camera: camera.name.clone(),
        pixels: map.apply(frame)?,
        source_timestamp: frame.timestamp,
        frame_index: frame.frame_number,
    })
}

/// 整个相机阵列的投影器，源尺寸确定后缓存每个相机的坐标表
pub struct Projector {
    cameras: Vec<CameraSpec>,
    output_size: (u32, u32),
    maps: Vec<ProjectionMap>,
}

impl Projector {
    pub fn new(cameras: Vec<CameraSpec>, output_size: (u32, u32)) -> Result<Self> {
        if output_size.0 == 0 || output_size.1 == 0 {
            return Err(ExtractError::InvalidFrameGeometry(format!(
                "output size {}x{}",
                output_size.0, output_size.1
            )));
        }
        Ok(Self {
            cameras,
            output_size,
            maps: Vec::new(),
        })
    }

    pub fn cameras(&self) -> &[CameraSpec] {
        &self.cameras
    }

    fn ensure_maps(&mut self, source_size: (u32, u32)) -> Result<()> {
        let fresh = self
            .maps
            .first()
            .map_or(true, |m| m.source_size() != source_size);
        if fresh {
            self.maps = self
                .cameras
                .par_iter()
                .map(|cam| ProjectionMap::new(cam, source_size, self.output_size))
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    /// 所有相机并行投影，按相机顺序返回
    pub fn project_all(&mut self, frame: &Frame) -> Result<Vec<ProjectedFrame>> {
        frame.validate()?;
        self.ensure_maps((frame.width, frame.height))?;

        self.cameras
            .par_iter()
            .zip(self.maps.par_iter())
            .map(|(cam, map)| {
                Ok(ProjectedFrame {
                    camera: cam.name.clone(),
                    pixels: map.apply(frame)?,
                    source_timestamp: frame.timestamp,
                    frame_index: frame.frame_number,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rig::{build_rig, LayoutMode, RigConfig};

    const RED: [u8; 3] = [220, 20, 20];
    const GREEN: [u8; 3] = [20, 220, 20];
    const BLUE: [u8; 3] = [20, 20, 220];
    const YELLOW: [u8; 3] = [220, 220, 20];
    const WHITE: [u8; 3] = [255, 255, 255];
    const BLACK: [u8; 3] = [0, 0, 0];

    /// 360x180 全景：经度分四个色带，顶部白、底部黑
    fn quadrant_panorama() -> Frame {
        let (w, h) = (360u32, 180u32);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let color = if y < 20 {
                    WHITE
                } else if y >= 160 {
                    BLACK
                } else if (135..225).contains(&x) {
                    RED
                } else if (225..315).contains(&x) {
                    GREEN
                } else if (45..135).contains(&x) {
                    YELLOW
                } else {
                    BLUE
                };
                data.extend_from_slice(&color);
            }
        }
        Frame::new(w, h, data, 0, 0)
    }

    fn center(img: &RgbImage) -> [u8; 3] {
        img.get_pixel(img.width() / 2, img.height() / 2).0
    }

    #[test]
    fn test_front_center_matches_source_center() {
        let frame = quadrant_panorama();
        let front = CameraSpec {
            name: "front".to_string(),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            horizontal_fov: 90.0,
        };
        let out = project(&frame, &front, (512, 512)).unwrap();
        assert_eq!(out.pixels.dimensions(), (512, 512));
        assert_eq!(center(&out.pixels), RED);
        assert_eq!(out.camera, "front");
    }

    #[test]
    fn test_rays_through_pixel_centres() {
        let front = CameraSpec {
            name: "front".to_string(),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            horizontal_fov: 90.0,
        };
        let map = ProjectionMap::new(&front, (360, 180), (32, 32)).unwrap();
        // 光轴落在中间两个像素之间
        let [ax, ay] = map.sample_coords(15, 15).unwrap();
        let [bx, by] = map.sample_coords(16, 16).unwrap();
        assert!(((ax + bx) / 2.0 - 179.5).abs() < 1e-3);
        assert!(((ay + by) / 2.0 - 89.5).abs() < 1e-3);
        assert!(bx > ax);
    }

    #[test]
    fn test_cube_faces_see_expected_regions() {
        let frame = quadrant_panorama();
        let rig = build_rig(&RigConfig::new(6, LayoutMode::Cube)).unwrap();
        let mut projector = Projector::new(rig, (64, 64)).unwrap();
        let views = projector.project_all(&frame).unwrap();

        let centers: Vec<_> = views.iter().map(|v| (v.camera.as_str(), center(&v.pixels))).collect();
        assert_eq!(
            centers,
            vec![
                ("front", RED),
                ("right", GREEN),
                ("back", BLUE),
                ("left", YELLOW),
                ("up", WHITE),
                ("down", BLACK),
            ]
        );
    }

    #[test]
    fn test_pole_view_has_no_tearing() {
        let frame = quadrant_panorama();
        let up = CameraSpec {
            name: "up".to_string(),
            yaw: 0.0,
            pitch: -90.0,
            roll: 0.0,
            horizontal_fov: 20.0,
        };
        let out = project(&frame, &up, (48, 48)).unwrap();
        // 20° 视场的角点纬度约 76°，全部落在白色顶部区域
        assert!(out.pixels.pixels().all(|p| p.0 == WHITE));
    }

    #[test]
    fn test_output_size_exact() {
        let frame = quadrant_panorama();
        let rig = build_rig(&RigConfig::new(3, LayoutMode::Ring)).unwrap();
        let out = project(&frame, &rig[1], (300, 200)).unwrap();
        assert_eq!(out.pixels.dimensions(), (300, 200));
    }

    #[test]
    fn test_horizontal_wrap_on_seam() {
        let frame = quadrant_panorama();
        let map = ProjectionMap::new(
            &CameraSpec {
                name: "back".to_string(),
                yaw: 180.0,
                pitch: 0.0,
                roll: 0.0,
                horizontal_fov: 90.0,
            },
            (360, 180),
            (32, 32),
        )
        .unwrap();
        let [sx, _] = map.sample_coords(16, 16).unwrap();
        assert!((sx - 359.5).abs().min((sx + 0.5).abs()) < 2.0);
        let img = map.apply(&frame).unwrap();
        assert_eq!(center(&img), BLUE);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let frame = quadrant_panorama();
        let rig = build_rig(&RigConfig::new(2, LayoutMode::Ring)).unwrap();
        assert!(matches!(
            project(&frame, &rig[0], (0, 10)),
            Err(ExtractError::InvalidFrameGeometry(_))
        ));
        let empty = Frame::new(0, 0, vec![], 0, 0);
        assert!(matches!(
            project(&empty, &rig[0], (10, 10)),
            Err(ExtractError::InvalidFrameGeometry(_))
        ));
        assert!(Projector::new(rig, (0, 0)).is_err());
    }

    #[test]
    fn test_projector_rebuilds_maps_on_new_source_size() {
        let rig = build_rig(&RigConfig::new(2, LayoutMode::Ring)).unwrap();
        let mut projector = Projector::new(rig, (16, 16)).unwrap();
        projector.project_all(&quadrant_panorama()).unwrap();
        let small = Frame::new(40, 20, vec![90u8; 40 * 20 * 3], 0, 1);
        let views = projector.project_all(&small).unwrap();
        assert_eq!(views.len(), 2);
        assert!(views[0].pixels.pixels().all(|p| p.0 == [90, 90, 90]));
        assert_eq!(views[1].frame_index, 1);
    }
}
