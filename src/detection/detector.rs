//! 方形标记检测器 (Square Marker Detector)
//! 职责: 帧 → 二值化 → 轮廓 → 四边形 → 图案识别 → 候选标记

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;

use super::matrix_code::{self, MATRIX_SIZE};
use super::pattern::{PatternTemplate, RgbGrid, PATT_SIZE};
use super::types::{
    Detection, MarkerCandidate, MarkerGeometry, MIN_PATTERN_CONFIDENCE, UNKNOWN_PATTERN,
};
use super::MarkerDetector;
use crate::error::{ArError, Result};
use crate::input::Frame;
use crate::ui_config::{ArConfig, ImageProcMode, ThresholdMode};
use crate::utils::{project, unit_square_to_quad};

/// 最小标记面积 (处理分辨率下的像素)
const MIN_MARKER_AREA: f64 = 100.0;

/// 标记面积上限 (占处理图像的比例)
const MAX_MARKER_AREA_RATIO: f64 = 0.9;

/// 多边形近似容差 (占轮廓周长的比例)
const POLY_EPSILON_RATIO: f64 = 0.03;

/// 角点离图像边缘的最小距离
const EDGE_MARGIN: f64 = 2.0;

/// 自适应阈值: 局部均值减去的常数
const ADAPTIVE_OFFSET: i32 = 7;

/// 每格采样数 (每个方向)
const PATTERN_SUBSAMPLES: usize = 2;
const MATRIX_SUBSAMPLES: usize = 4;

pub struct SquareMarkerDetector {
    patterns: Vec<PatternTemplate>,
    /// 黑边宽度占标记边长的比例
    border: f64,
}

impl SquareMarkerDetector {
    pub fn new(patterns: Vec<PatternTemplate>, border: f64) -> Self {
        tracing::info!(
            "🎯 标记检测器: {} 个模板, 黑边比例 {:.2}",
            patterns.len(),
            border
        );
        Self { patterns, border }
    }

    /// 二值化: 暗像素 (标记) 为 255, 返回前景图与实际全局阈值
    fn binarize(&self, luma: &GrayImage, mode: ThresholdMode, manual: u8) -> (GrayImage, Option<u8>) {
        let global = match mode {
            ThresholdMode::Manual => Some(manual),
            ThresholdMode::AutoMedian => Some(median_level(luma)),
            ThresholdMode::AutoOtsu => Some(imageproc::contrast::otsu_level(luma)),
            ThresholdMode::AutoAdaptive => None,
        };

        let foreground = match global {
            Some(level) => GrayImage::from_fn(luma.width(), luma.height(), |x, y| {
                Luma([if luma.get_pixel(x, y)[0] < level { 255 } else { 0 }])
            }),
            None => {
                let radius = (luma.width().max(luma.height()) / 32).max(3);
                let local_mean = imageproc::filter::box_filter(luma, radius, radius);
                GrayImage::from_fn(luma.width(), luma.height(), |x, y| {
                    let v = luma.get_pixel(x, y)[0] as i32;
                    let mean = local_mean.get_pixel(x, y)[0] as i32;
                    Luma([if v < mean - ADAPTIVE_OFFSET { 255 } else { 0 }])
                })
            }
        };
        (foreground, global)
    }

    /// 在前景图中寻找四边形 (按面积降序, 已去除嵌套)
    fn find_quads(&self, foreground: &GrayImage) -> Vec<MarkerGeometry> {
        let (w, h) = (foreground.width() as f64, foreground.height() as f64);
        let max_area = w * h * MAX_MARKER_AREA_RATIO;

        let mut quads: Vec<MarkerGeometry> = find_contours::<i32>(foreground)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 8)
            .filter_map(|c| fit_quad(&c.points))
            .filter(|g| g.area >= MIN_MARKER_AREA && g.area <= max_area)
            .filter(|g| {
                g.vertices.iter().all(|&(x, y)| {
                    x >= EDGE_MARGIN && y >= EDGE_MARGIN && x <= w - 1.0 - EDGE_MARGIN && y <= h - 1.0 - EDGE_MARGIN
                })
            })
            .collect();

        quads.sort_by(|a, b| b.area.total_cmp(&a.area));
        let mut kept: Vec<MarkerGeometry> = Vec::with_capacity(quads.len());
        for quad in quads {
            if !kept.iter().any(|outer| contains_point(outer, quad.center)) {
                kept.push(quad);
            }
        }
        kept
    }

    /// 识别四边形内部图案
    fn identify(&self, frame: &Frame, geometry: MarkerGeometry, config: &ArConfig) -> MarkerCandidate {
        let mode = config.pattern_detection_mode;

        if mode.uses_template() && !self.patterns.is_empty() {
            if let Some(sample) = self.sample_pattern(frame, &geometry) {
                let best = self
                    .patterns
                    .iter()
                    .enumerate()
                    .map(|(id, p)| (id, p.match_grid(&sample, mode.is_mono())))
                    .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence));
                if let Some((id, m)) = best {
                    if m.confidence >= MIN_PATTERN_CONFIDENCE {
                        return MarkerCandidate {
                            id: id as i32,
                            confidence: m.confidence,
                            geometry: geometry.rotated(m.direction),
                        };
                    }
                }
            }
        }

        if mode.uses_matrix() {
            if let Some(decoded) = self
                .sample_matrix(frame, &geometry)
                .and_then(|cells| matrix_code::decode(&cells))
            {
                return MarkerCandidate {
                    id: decoded.id,
                    confidence: decoded.confidence,
                    geometry: geometry.rotated(decoded.direction),
                };
            }
        }

        MarkerCandidate {
            id: UNKNOWN_PATTERN,
            confidence: 0.0,
            geometry,
        }
    }

    /// 采样标记内部为 16x16 RGB 网格
    fn sample_pattern(&self, frame: &Frame, geometry: &MarkerGeometry) -> Option<RgbGrid> {
        let h = unit_square_to_quad(&geometry.vertices)?;
        let inner = 1.0 - 2.0 * self.border;
        let step = inner / PATT_SIZE as f64;
        let n = (PATTERN_SUBSAMPLES * PATTERN_SUBSAMPLES) as u32;

        let mut grid: RgbGrid = [[[0; 3]; PATT_SIZE]; PATT_SIZE];
        for (row, line) in grid.iter_mut().enumerate() {
            for (col, px) in line.iter_mut().enumerate() {
                let mut acc = [0u32; 3];
                for sy in 0..PATTERN_SUBSAMPLES {
                    for sx in 0..PATTERN_SUBSAMPLES {
                        let u = self.border
                            + step * (col as f64 + (sx as f64 + 0.5) / PATTERN_SUBSAMPLES as f64);
                        let v = self.border
                            + step * (row as f64 + (sy as f64 + 0.5) / PATTERN_SUBSAMPLES as f64);
                        let (x, y) = project(&h, u, v)?;
                        let rgb = sample_rgb(frame, x, y)?;
                        for c in 0..3 {
                            acc[c] += rgb[c] as u32;
                        }
                    }
                }
                *px = acc.map(|v| (v / n) as u8);
            }
        }
        Some(grid)
    }

    /// 采样 3x3 矩阵码各格的平均灰度 (只取格中心60%区域)
    fn sample_matrix(
        &self,
        frame: &Frame,
        geometry: &MarkerGeometry,
    ) -> Option<[[f64; MATRIX_SIZE]; MATRIX_SIZE]> {
        let h = unit_square_to_quad(&geometry.vertices)?;
        let inner = 1.0 - 2.0 * self.border;
        let cell = inner / MATRIX_SIZE as f64;

        let mut cells = [[0.0; MATRIX_SIZE]; MATRIX_SIZE];
        for (row, line) in cells.iter_mut().enumerate() {
            for (col, value) in line.iter_mut().enumerate() {
                let mut sum = 0.0;
                for sy in 0..MATRIX_SUBSAMPLES {
                    for sx in 0..MATRIX_SUBSAMPLES {
                        let fx = 0.2 + 0.6 * (sx as f64 + 0.5) / MATRIX_SUBSAMPLES as f64;
                        let fy = 0.2 + 0.6 * (sy as f64 + 0.5) / MATRIX_SUBSAMPLES as f64;
                        let u = self.border + cell * (col as f64 + fx);
                        let v = self.border + cell * (row as f64 + fy);
                        let (x, y) = project(&h, u, v)?;
                        let [r, g, b] = sample_rgb(frame, x, y)?;
                        sum += (r as f64 * 299.0 + g as f64 * 587.0 + b as f64 * 114.0) / 1000.0;
                    }
                }
                *value = sum / (MATRIX_SUBSAMPLES * MATRIX_SUBSAMPLES) as f64;
            }
        }
        Some(cells)
    }
}

impl MarkerDetector for SquareMarkerDetector {
    fn detect(&mut self, frame: &Frame, config: &ArConfig) -> Result<Detection> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.rgba_data.len() != expected {
            return Err(ArError::Detection(format!(
                "帧缓冲区长度 {} 与尺寸 {}x{} 不符",
                frame.rgba_data.len(),
                frame.width,
                frame.height
            )));
        }

        let full = frame.to_luma();
        let (luma, scale) = match config.image_proc_mode {
            ImageProcMode::FullFrame => (full, 1.0),
            ImageProcMode::Field => (half_resolution(&full), 2.0),
        };

        let (foreground, threshold) =
            self.binarize(&luma, config.threshold_mode, config.threshold);

        let candidates = self
            .find_quads(&foreground)
            .into_iter()
            .map(|quad| {
                let geometry = if scale != 1.0 { quad.scaled(scale, scale) } else { quad };
                self.identify(frame, geometry, config)
            })
            .collect();

        let debug_image = config.debug.then(|| {
            let mut visual = foreground;
            visual.pixels_mut().for_each(|p| p[0] = 255 - p[0]);
            visual
        });

        Ok(Detection {
            candidates,
            threshold,
            debug_image,
        })
    }
}

/// 灰度直方图中值
fn median_level(luma: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in luma.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let half = (luma.width() as u64 * luma.height() as u64).div_ceil(2);
    let mut cumulative = 0u64;
    for (level, count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= half {
            return level as u8;
        }
    }
    255
}

/// 隔行隔列取样 (偶数场)
fn half_resolution(luma: &GrayImage) -> GrayImage {
    GrayImage::from_fn((luma.width() / 2).max(1), (luma.height() / 2).max(1), |x, y| {
        *luma.get_pixel(
            (x * 2).min(luma.width() - 1),
            (y * 2).min(luma.height() - 1),
        )
    })
}

fn sample_rgb(frame: &Frame, x: f64, y: f64) -> Option<[u8; 3]> {
    if !(x.is_finite() && y.is_finite()) || x < -0.5 || y < -0.5 {
        return None;
    }
    frame.rgb_at(x.round() as u32, y.round() as u32)
}

/// 轮廓 → 凸四边形 (顶点按屏幕顺时针排列, 已做亚像素直线拟合)
fn fit_quad(points: &[Point<i32>]) -> Option<MarkerGeometry> {
    let epsilon = arc_length(points, true) * POLY_EPSILON_RATIO;
    let mut poly = approximate_polygon_dp(points, epsilon, true);
    poly.dedup();
    if poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    drop_collinear(&mut poly, epsilon);
    if poly.len() != 4 {
        return None;
    }

    let corners: Vec<(f64, f64)> = poly.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    if !is_convex(&corners) {
        return None;
    }

    let indices: Option<Vec<usize>> = poly
        .iter()
        .map(|corner| points.iter().position(|p| p == corner))
        .collect();
    let refined = indices
        .and_then(|idx| refine_corners(points, &idx))
        .unwrap_or([corners[0], corners[1], corners[2], corners[3]]);

    let mut vertices = refined;
    if signed_area(&vertices) < 0.0 {
        vertices.swap(1, 3);
    }
    Some(MarkerGeometry::from_vertices(vertices))
}

/// 去除与相邻两顶点近似共线的顶点 (轮廓起点常落在边上)
fn drop_collinear(poly: &mut Vec<Point<i32>>, epsilon: f64) {
    loop {
        let n = poly.len();
        if n <= 3 {
            return;
        }
        let redundant = (0..n).find(|&i| {
            let prev = poly[(i + n - 1) % n];
            let next = poly[(i + 1) % n];
            let p = poly[i];
            let (dx, dy) = ((next.x - prev.x) as f64, (next.y - prev.y) as f64);
            let len = (dx * dx + dy * dy).sqrt();
            if len < 1e-9 {
                return true;
            }
            let dist = (dx * (p.y - prev.y) as f64 - dy * (p.x - prev.x) as f64).abs() / len;
            dist < epsilon
        });
        match redundant {
            Some(i) => {
                poly.remove(i);
            }
            None => return,
        }
    }
}

/// 对四条边分别拟合直线, 相邻边求交得到亚像素角点
fn refine_corners(points: &[Point<i32>], idx: &[usize]) -> Option<[(f64, f64); 4]> {
    let n = points.len();
    let mut lines = Vec::with_capacity(4);
    for side in 0..4 {
        let start = idx[side];
        let end = idx[(side + 1) % 4];
        let len = (end + n - start) % n;
        let trim = (len / 10).max(1);
        if len <= 2 * trim + 1 {
            return None;
        }
        let segment: Vec<(f64, f64)> = (trim..=len - trim)
            .map(|k| {
                let p = points[(start + k) % n];
                (p.x as f64, p.y as f64)
            })
            .collect();
        lines.push(fit_line(&segment)?);
    }

    let mut corners = [(0.0, 0.0); 4];
    for (k, corner) in corners.iter_mut().enumerate() {
        *corner = intersect(&lines[(k + 3) % 4], &lines[k])?;
    }
    Some(corners)
}

/// 直线: 过点 `point`, 单位方向 `dir`
struct Line {
    point: (f64, f64),
    dir: (f64, f64),
}

/// 主成分方向拟合直线
fn fit_line(points: &[(f64, f64)]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
        sxy += (x - mx) * (y - my);
    }
    if sxx + syy < 1e-12 {
        return None;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        point: (mx, my),
        dir: (theta.cos(), theta.sin()),
    })
}

fn intersect(a: &Line, b: &Line) -> Option<(f64, f64)> {
    let cross = a.dir.0 * b.dir.1 - a.dir.1 * b.dir.0;
    if cross.abs() < 1e-9 {
        return None;
    }
    let dx = b.point.0 - a.point.0;
    let dy = b.point.1 - a.point.1;
    let t = (dx * b.dir.1 - dy * b.dir.0) / cross;
    Some((a.point.0 + t * a.dir.0, a.point.1 + t * a.dir.1))
}

/// 鞋带公式有向面积 (屏幕顺时针为正)
fn signed_area(v: &[(f64, f64)]) -> f64 {
    let n = v.len();
    (0..n)
        .map(|i| {
            let (x1, y1) = v[i];
            let (x2, y2) = v[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum::<f64>()
        / 2.0
}

fn is_convex(v: &[(f64, f64)]) -> bool {
    let n = v.len();
    let crosses: Vec<f64> = (0..n)
        .map(|i| {
            let (ax, ay) = v[i];
            let (bx, by) = v[(i + 1) % n];
            let (cx, cy) = v[(i + 2) % n];
            (bx - ax) * (cy - by) - (by - ay) * (cx - bx)
        })
        .collect();
    crosses.iter().all(|&c| c > 0.0) || crosses.iter().all(|&c| c < 0.0)
}

/// 点是否位于凸四边形内部
fn contains_point(quad: &MarkerGeometry, (px, py): (f64, f64)) -> bool {
    let v = &quad.vertices;
    let sides: Vec<f64> = (0..4)
        .map(|i| {
            let (ax, ay) = v[i];
            let (bx, by) = v[(i + 1) % 4];
            (bx - ax) * (py - ay) - (by - ay) * (px - ax)
        })
        .collect();
    sides.iter().all(|&s| s >= 0.0) || sides.iter().all(|&s| s <= 0.0)
}
