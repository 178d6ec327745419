//! 相机内参 (ARToolKit 格式)
//!
//! 支持 ARToolKit 二进制 `.dat` (大端序) 与 JSON 两种格式.

use crate::error::{ArError, Result};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// `.dat` 文件长度: 2个i32 + 12个f64 + 4个f64
const DAT_FILE_LEN: usize = 4 * 2 + 8 * 12 + 8 * 4;

/// 畸变校正迭代次数
const UNDISTORT_ITERATIONS: usize = 3;

/// 相机参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParam {
    pub xsize: u32,
    pub ysize: u32,
    /// 3x4 投影矩阵 (行优先)
    pub mat: [[f64; 4]; 3],
    /// 畸变参数: 畸变中心 x0, y0, 畸变系数 f, 缩放 s
    pub dist_factor: [f64; 4],
}

impl CameraParam {
    /// 按扩展名加载 (`.json` 为JSON, 其余按二进制 `.dat` 解析)
    pub fn load(path: &Path) -> Result<Self> {
        let param_error = |reason: String| ArError::CameraParam {
            path: path.to_path_buf(),
            reason,
        };

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let param = if is_json {
            let json = fs::read_to_string(path).map_err(|e| param_error(e.to_string()))?;
            let param: Self = serde_json::from_str(&json).map_err(|e| param_error(e.to_string()))?;
            param.validate().map_err(param_error)?;
            param
        } else {
            let bytes = fs::read(path).map_err(|e| param_error(e.to_string()))?;
            Self::from_dat_bytes(&bytes).map_err(param_error)?
        };

        tracing::info!("📷 相机参数已加载: {}", path.display());
        Ok(param)
    }

    /// 解析 ARToolKit 二进制相机参数
    pub fn from_dat_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < DAT_FILE_LEN {
            return Err(format!(
                "文件过短: {} 字节, 至少需要 {} 字节",
                bytes.len(),
                DAT_FILE_LEN
            ));
        }

        let read_i32 = |offset: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[offset..offset + 4]);
            i32::from_be_bytes(buf)
        };
        let read_f64 = |offset: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[offset..offset + 8]);
            f64::from_be_bytes(buf)
        };

        let xsize = read_i32(0);
        let ysize = read_i32(4);
        if xsize <= 0 || ysize <= 0 {
            return Err(format!("非法图像尺寸: {}x{}", xsize, ysize));
        }

        let mut mat = [[0.0; 4]; 3];
        for (r, row) in mat.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = read_f64(8 + (r * 4 + c) * 8);
            }
        }
        let mut dist_factor = [0.0; 4];
        for (i, value) in dist_factor.iter_mut().enumerate() {
            *value = read_f64(8 + 12 * 8 + i * 8);
        }

        let param = Self {
            xsize: xsize as u32,
            ysize: ysize as u32,
            mat,
            dist_factor,
        };
        param.validate()?;
        Ok(param)
    }

    /// 编码为 ARToolKit 二进制格式
    pub fn to_dat_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(DAT_FILE_LEN);
        bytes.extend_from_slice(&(self.xsize as i32).to_be_bytes());
        bytes.extend_from_slice(&(self.ysize as i32).to_be_bytes());
        for value in self.mat.iter().flatten().chain(self.dist_factor.iter()) {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes
    }

    /// 图像尺寸为正, 所有数值有限, 畸变缩放系数非零
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.xsize == 0 || self.ysize == 0 {
            return Err(format!("非法图像尺寸: {}x{}", self.xsize, self.ysize));
        }
        let all_finite = self
            .mat
            .iter()
            .flatten()
            .chain(self.dist_factor.iter())
            .all(|v| v.is_finite());
        if !all_finite || self.dist_factor[3].abs() <= f64::EPSILON {
            return Err("参数包含非法数值".to_string());
        }
        Ok(())
    }

    /// 按新图像尺寸缩放参数
    pub fn change_size(&self, xsize: u32, ysize: u32) -> Self {
        let sx = xsize as f64 / self.xsize as f64;
        let sy = ysize as f64 / self.ysize as f64;

        let mut mat = self.mat;
        for c in 0..4 {
            mat[0][c] *= sx;
            mat[1][c] *= sy;
        }

        Self {
            xsize,
            ysize,
            mat,
            dist_factor: [
                self.dist_factor[0] * sx,
                self.dist_factor[1] * sy,
                self.dist_factor[2] / (sx * sy),
                self.dist_factor[3],
            ],
        }
    }

    /// 与视频源尺寸不一致时缩放参数
    pub fn fit_to(self, frame_size: (u32, u32)) -> Self {
        if (self.xsize, self.ysize) == frame_size {
            return self;
        }
        tracing::warn!(
            "⚠️ 相机参数尺寸 {}x{} 与视频帧 {}x{} 不一致, 已缩放",
            self.xsize,
            self.ysize,
            frame_size.0,
            frame_size.1
        );
        self.change_size(frame_size.0, frame_size.1)
    }

    /// 内参矩阵 K (投影矩阵左3x3)
    pub fn intrinsics(&self) -> Matrix3<f64> {
        let m = &self.mat;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        )
    }

    /// 理想 (无畸变) 坐标 → 观测坐标
    pub fn ideal_to_observed(&self, ix: f64, iy: f64) -> (f64, f64) {
        let [x0, y0, f, s] = self.dist_factor;
        let x = (ix - x0) * s;
        let y = (iy - y0) * s;
        if x == 0.0 && y == 0.0 {
            return (x0, y0);
        }
        let d = 1.0 - f / 100_000_000.0 * (x * x + y * y);
        (x * d + x0, y * d + y0)
    }

    /// 观测坐标 → 理想坐标 (牛顿迭代求解径向畸变)
    pub fn observed_to_ideal(&self, ox: f64, oy: f64) -> (f64, f64) {
        let [x0, y0, f, s] = self.dist_factor;
        let p = f / 100_000_000.0;

        let mut px = ox - x0;
        let mut py = oy - y0;
        let q = (px * px + py * py).sqrt();
        let mut z02 = px * px + py * py;
        let mut z0 = q;

        for i in 1..=UNDISTORT_ITERATIONS {
            if z0 == 0.0 {
                px = 0.0;
                py = 0.0;
                break;
            }
            let z = z0 - ((1.0 - p * z02) * z0 - q) / (1.0 - 3.0 * p * z02);
            px *= z / z0;
            py *= z / z0;
            if i == UNDISTORT_ITERATIONS {
                break;
            }
            z02 = px * px + py * py;
            z0 = z02.sqrt();
        }

        (px / s + x0, py / s + y0)
    }

    /// 打印相机参数
    pub fn print_summary(&self) {
        tracing::info!("📷 相机参数: {}x{}", self.xsize, self.ysize);
        for row in &self.mat {
            tracing::info!(
                "  [{:>10.4} {:>10.4} {:>10.4} {:>10.4}]",
                row[0],
                row[1],
                row[2],
                row[3]
            );
        }
        tracing::info!(
            "  畸变: x0={:.2} y0={:.2} f={:.2} s={:.5}",
            self.dist_factor[0],
            self.dist_factor[1],
            self.dist_factor[2],
            self.dist_factor[3]
        );
    }
}
