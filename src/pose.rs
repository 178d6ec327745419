//! 位姿估计 (Pose Estimation)
//!
//! 由标记四个角点求解 标记 → 相机 的刚体变换.
//! 相机坐标系: x 向右, y 向下, z 向前.
//! 标记坐标系: 原点在标记中心, x 向右, y 向上 (图案上方), z 指出标记平面.

use crate::camera_param::CameraParam;
use crate::detection::MarkerGeometry;
use crate::error::{ArError, Result};
use crate::utils::estimate_homography;
use nalgebra::{Matrix3, Vector3};

/// 3x4 标记 → 相机变换 (行优先)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub matrix: [[f64; 4]; 3],
}

impl Pose {
    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let mut matrix = [[0.0; 4]; 3];
        for (r, row) in matrix.iter_mut().enumerate() {
            for c in 0..3 {
                row[c] = rotation[(r, c)];
            }
            row[3] = translation[r];
        }
        Self { matrix }
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|r, c| self.matrix[r][c])
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.matrix[0][3], self.matrix[1][3], self.matrix[2][3])
    }

    /// 标记坐标系中的点 → 相机坐标系
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * p + self.translation()
    }
}

/// 位姿估计结果
#[derive(Clone, Copy, Debug)]
pub struct PoseEstimate {
    pub pose: Pose,
    /// 平均重投影误差 (像素)
    pub residual: f64,
}

/// 位姿估计器接口
pub trait PoseEstimator {
    /// 由标记几何与物理边长 (毫米) 估计位姿
    fn estimate(&mut self, geometry: &MarkerGeometry, marker_width: f64) -> Result<PoseEstimate>;
}

/// 正方形标记角点在标记坐标系中的位置 (顶点0为图案左上角, 顺时针)
pub fn marker_corners(marker_width: f64) -> [(f64, f64); 4] {
    let h = marker_width / 2.0;
    [(-h, h), (h, h), (h, -h), (-h, -h)]
}

/// 基于单应分解的方形标记位姿估计
pub struct SquarePoseEstimator {
    param: CameraParam,
    k: Matrix3<f64>,
    k_inv: Matrix3<f64>,
}

impl SquarePoseEstimator {
    pub fn new(param: CameraParam) -> Result<Self> {
        let k = param.intrinsics();
        let k_inv = k
            .try_inverse()
            .ok_or_else(|| ArError::PoseEstimation("内参矩阵不可逆".to_string()))?;
        Ok(Self { param, k, k_inv })
    }

    pub fn camera_param(&self) -> &CameraParam {
        &self.param
    }

    /// 单应矩阵分解为 R|t, 旋转投影到 SO(3)
    fn decompose(&self, h: &Matrix3<f64>) -> Result<(Matrix3<f64>, Vector3<f64>)> {
        let degenerate = || ArError::PoseEstimation("单应矩阵退化".to_string());

        let k_inv_h1 = self.k_inv * h.column(0);
        let k_inv_h2 = self.k_inv * h.column(1);
        let k_inv_h3 = self.k_inv * h.column(2);

        let norm1 = k_inv_h1.norm();
        let norm2 = k_inv_h2.norm();
        if norm1 <= 1e-12 || norm2 <= 1e-12 {
            return Err(degenerate());
        }
        let lambda = 2.0 / (norm1 + norm2);

        let mut r1 = k_inv_h1 * lambda;
        let mut r2 = k_inv_h2 * lambda;
        let mut t = k_inv_h3 * lambda;
        // 单应矩阵符号不定, 取标记位于相机前方的解
        if t.z < 0.0 {
            r1 = -r1;
            r2 = -r2;
            t = -t;
        }
        let r3 = r1.cross(&r2);
        if r3.norm() <= 1e-12 {
            return Err(degenerate());
        }

        let r = Matrix3::from_columns(&[r1, r2, r3]);
        let svd = r.svd(true, true);
        let u = svd.u.ok_or_else(degenerate)?;
        let v_t = svd.v_t.ok_or_else(degenerate)?;
        let mut r_orth = u * v_t;
        if r_orth.determinant() < 0.0 {
            let mut u_flipped = u;
            u_flipped.column_mut(2).neg_mut();
            r_orth = u_flipped * v_t;
        }

        if t.z <= 1e-9 {
            return Err(ArError::PoseEstimation("标记位于相机后方".to_string()));
        }
        Ok((r_orth, t))
    }

    /// 平均重投影误差 (观测像素坐标)
    fn reprojection_error(
        &self,
        pose: &Pose,
        object: &[(f64, f64); 4],
        observed: &[(f64, f64); 4],
    ) -> f64 {
        let total: f64 = object
            .iter()
            .zip(observed.iter())
            .map(|(&(x, y), &(ox, oy))| {
                let cam = pose.transform_point(&Vector3::new(x, y, 0.0));
                let img = self.k * cam;
                let (ix, iy) = (img.x / img.z, img.y / img.z);
                let (px, py) = self.param.ideal_to_observed(ix, iy);
                ((px - ox).powi(2) + (py - oy).powi(2)).sqrt()
            })
            .sum();
        total / 4.0
    }
}

impl PoseEstimator for SquarePoseEstimator {
    fn estimate(&mut self, geometry: &MarkerGeometry, marker_width: f64) -> Result<PoseEstimate> {
        if marker_width.is_nan() || marker_width <= 0.0 {
            return Err(ArError::PoseEstimation(format!(
                "非法标记宽度: {}",
                marker_width
            )));
        }

        let object = marker_corners(marker_width);
        let ideal = geometry
            .vertices
            .map(|(x, y)| self.param.observed_to_ideal(x, y));

        let h = estimate_homography(&object, &ideal)
            .ok_or_else(|| ArError::PoseEstimation("角点退化, 无法求解单应矩阵".to_string()))?;
        let (r, t) = self.decompose(&h)?;
        let pose = Pose::from_parts(&r, &t);
        let residual = self.reprojection_error(&pose, &object, &geometry.vertices);

        Ok(PoseEstimate { pose, residual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn param() -> CameraParam {
        CameraParam {
            xsize: 640,
            ysize: 480,
            mat: [
                [600.0, 0.0, 320.0, 0.0],
                [0.0, 600.0, 240.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            dist_factor: [320.0, 240.0, 0.0, 1.0],
        }
    }

    /// 按给定位姿投影标记角点
    fn project_marker(param: &CameraParam, pose: &Pose, width: f64) -> MarkerGeometry {
        let k = param.intrinsics();
        let vertices = marker_corners(width).map(|(x, y)| {
            let p = k * pose.transform_point(&Vector3::new(x, y, 0.0));
            (p.x / p.z, p.y / p.z)
        });
        MarkerGeometry::from_vertices(vertices)
    }

    #[test]
    fn test_recovers_synthetic_pose() {
        // 标记正对相机: 标记 y 向上 = 相机 -y, 标记 z = 相机 -z
        let facing = Rotation3::from_euler_angles(std::f64::consts::PI, 0.0, 0.0);
        let tilt = Rotation3::from_euler_angles(0.2, -0.15, 0.3);
        let rotation = (tilt * facing).into_inner();
        let truth = Pose::from_parts(&rotation, &Vector3::new(15.0, -10.0, 400.0));

        let geometry = project_marker(&param(), &truth, 80.0);
        let mut estimator = SquarePoseEstimator::new(param()).unwrap();
        let estimate = estimator.estimate(&geometry, 80.0).unwrap();

        let t = estimate.pose.translation();
        assert!((t - truth.translation()).norm() < 1e-3, "t = {}", t);
        let r_err = (estimate.pose.rotation() - rotation).norm();
        assert!(r_err < 1e-4, "rotation error {}", r_err);
        assert!(estimate.residual < 1e-3);
    }

    #[test]
    fn test_collapsed_marker_fails() {
        let geometry =
            MarkerGeometry::from_vertices([(100.0, 100.0), (100.0, 100.0), (100.0, 100.0), (100.0, 100.0)]);
        let mut estimator = SquarePoseEstimator::new(param()).unwrap();
        assert!(estimator.estimate(&geometry, 80.0).is_err());
    }

    #[test]
    fn test_rejects_non_positive_width() {
        let geometry =
            MarkerGeometry::from_vertices([(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let mut estimator = SquarePoseEstimator::new(param()).unwrap();
        assert!(matches!(
            estimator.estimate(&geometry, 0.0),
            Err(ArError::PoseEstimation(_))
        ));
    }
}
