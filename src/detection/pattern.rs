//! ARToolKit `.patt` 模板: 加载与归一化相关匹配
//!
//! 文件由4个方向块组成, 每块为 B/G/R 三个 16x16 灰度平面.
//! 匹配只以第一个方向块为准, 其余三个方向由旋转生成, 文件中的后三块仅做格式校验.

use crate::error::{ArError, Result};
use std::fs;
use std::path::Path;

/// 模板边长 (格)
pub const PATT_SIZE: usize = 16;

const CELLS: usize = PATT_SIZE * PATT_SIZE;
const VALUES_PER_FILE: usize = 4 * 3 * CELLS;

/// 16x16 RGB 网格, `grid[row][col]`
pub type RgbGrid = [[[u8; 3]; PATT_SIZE]; PATT_SIZE];

/// 一个方向的模板向量 (已去均值) 及其模长
#[derive(Clone, Debug)]
struct Orientation {
    color: Vec<f64>,
    color_pow: f64,
    mono: Vec<f64>,
    mono_pow: f64,
}

/// 模板匹配结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatternMatch {
    /// 采样网格相对模板的顺时针旋转次数 (即图案左上角所在的顶点序号)
    pub direction: usize,
    pub confidence: f64,
}

/// 已加载的标记模板
#[derive(Clone, Debug)]
pub struct PatternTemplate {
    pub name: String,
    orientations: Vec<Orientation>,
}

impl PatternTemplate {
    /// 从 `.patt` 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ArError::Pattern {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let template = Self::parse(&name, &text).map_err(|reason| ArError::Pattern {
            path: path.to_path_buf(),
            reason,
        })?;
        tracing::info!("🔲 标记模板已加载: {}", template.name);
        Ok(template)
    }

    /// 解析 `.patt` 文本
    pub fn parse(name: &str, text: &str) -> std::result::Result<Self, String> {
        let values = text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<u8>()
                    .map_err(|_| format!("非法数值: {}", tok))
            })
            .collect::<std::result::Result<Vec<u8>, String>>()?;
        if values.len() < VALUES_PER_FILE {
            return Err(format!(
                "数据不完整: {} 个数值, 需要 {}",
                values.len(),
                VALUES_PER_FILE
            ));
        }

        // 第一个方向块: 平面顺序 B, G, R
        let mut grid: RgbGrid = [[[0; 3]; PATT_SIZE]; PATT_SIZE];
        for plane in 0..3 {
            for row in 0..PATT_SIZE {
                for col in 0..PATT_SIZE {
                    grid[row][col][2 - plane] = values[plane * CELLS + row * PATT_SIZE + col];
                }
            }
        }
        Ok(Self::from_grid(name, &grid))
    }

    /// 由图案网格构造 (生成4个方向)
    pub fn from_grid(name: &str, grid: &RgbGrid) -> Self {
        let mut orientations = Vec::with_capacity(4);
        let mut current = *grid;
        for _ in 0..4 {
            orientations.push(Orientation::from_grid(&current));
            current = rotate_cw(&current);
        }
        Self {
            name: name.to_string(),
            orientations,
        }
    }

    /// 导出为 `.patt` 文本 (四个方向块依次顺时针旋转)
    pub fn grid_to_patt_string(grid: &RgbGrid) -> String {
        let mut out = String::new();
        let mut current = *grid;
        for _ in 0..4 {
            for plane in 0..3 {
                for row in current.iter() {
                    let line: Vec<String> = row
                        .iter()
                        .map(|px| format!("{:3}", px[2 - plane]))
                        .collect();
                    out.push_str(&line.join(" "));
                    out.push('\n');
                }
            }
            out.push('\n');
            current = rotate_cw(&current);
        }
        out
    }

    /// 与采样网格匹配, 返回最佳方向与相关系数
    pub fn match_grid(&self, sample: &RgbGrid, mono: bool) -> PatternMatch {
        let sample_grid = Orientation::from_grid(sample);
        let mut best = PatternMatch {
            direction: 0,
            confidence: -1.0,
        };
        for (direction, orientation) in self.orientations.iter().enumerate() {
            let confidence = if mono {
                correlation(&sample_grid.mono, sample_grid.mono_pow, &orientation.mono, orientation.mono_pow)
            } else {
                correlation(
                    &sample_grid.color,
                    sample_grid.color_pow,
                    &orientation.color,
                    orientation.color_pow,
                )
            };
            if confidence > best.confidence {
                best = PatternMatch {
                    direction,
                    confidence,
                };
            }
        }
        best
    }
}

impl Orientation {
    fn from_grid(grid: &RgbGrid) -> Self {
        let color: Vec<f64> = grid
            .iter()
            .flatten()
            .flat_map(|px| px.iter().map(|&v| v as f64))
            .collect();
        let mono: Vec<f64> = grid
            .iter()
            .flatten()
            .map(|px| (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0)
            .collect();
        let (color, color_pow) = centered(color);
        let (mono, mono_pow) = centered(mono);
        Self {
            color,
            color_pow,
            mono,
            mono_pow,
        }
    }
}

/// 去均值并返回模长
fn centered(mut values: Vec<f64>) -> (Vec<f64>, f64) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter_mut().for_each(|v| *v -= mean);
    let pow = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    (values, pow)
}

/// 归一化相关系数, 任一方为常数时为0
fn correlation(a: &[f64], a_pow: f64, b: &[f64], b_pow: f64) -> f64 {
    if a_pow < 1e-9 || b_pow < 1e-9 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_pow * b_pow)
}

/// 网格顺时针旋转90°
pub fn rotate_cw(grid: &RgbGrid) -> RgbGrid {
    let mut out: RgbGrid = [[[0; 3]; PATT_SIZE]; PATT_SIZE];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, px) in row.iter_mut().enumerate() {
            *px = grid[PATT_SIZE - 1 - j][i];
        }
    }
    out
}
