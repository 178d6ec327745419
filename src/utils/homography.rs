//! 平面单应性估计 (DLT + Hartley 归一化)
//!
//! 用于: 标记内部图案采样 (单位正方形 → 图像四边形) 与位姿初始化.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

/// 通过单应矩阵投影一个点, 落在无穷远处时返回 None
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let p = h * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-15 {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

/// 平移质心到原点, 缩放使平均距离为 sqrt(2)
fn normalize_points(pts: &[(f64, f64)]) -> (Matrix3<f64>, Vec<(f64, f64)>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.1).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| (s * (p.0 - cx), s * (p.1 - cy))).collect();
    (t, normalized)
}

/// 由 ≥4 组对应点估计单应矩阵 H, 使 dst ≈ project(H, src)
///
/// 点数不足或退化 (如三点共线) 时返回 None.
pub fn estimate_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = src_n[i];
        let (dx, dy) = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // A^T A 最小特征值对应的特征向量即为解 (4点时零空间维数恰为1)
    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eig.eigenvectors.column(min_idx);
    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    // 反归一化: H = T_dst^-1 * H_n * T_src
    let t_dst_inv = t_dst.try_inverse()?;
    let mut hm = t_dst_inv * h_n * t_src;
    if hm[(2, 2)].abs() > 1e-15 {
        hm /= hm[(2, 2)];
    }

    // 退化检查 (与尺度无关): 奇异矩阵会把四边形压成直线
    let scale = hm.norm();
    if hm.iter().any(|v| !v.is_finite()) || scale < 1e-15 {
        return None;
    }
    if (hm.determinant() / scale.powi(3)).abs() < 1e-9 {
        return None;
    }
    Some(hm)
}

/// 单位正方形 (0,0)-(1,0)-(1,1)-(0,1) → 图像四边形
pub fn unit_square_to_quad(quad: &[(f64, f64); 4]) -> Option<Matrix3<f64>> {
    const UNIT: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
    estimate_homography(&UNIT, quad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_point_exact_fit() {
        let src = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let dst = [(100.0, 120.0), (220.0, 110.0), (240.0, 230.0), (90.0, 250.0)];
        let h = estimate_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = project(&h, s.0, s.1).unwrap();
            assert!((x - d.0).abs() < 1e-6, "x {} vs {}", x, d.0);
            assert!((y - d.1).abs() < 1e-6, "y {} vs {}", y, d.1);
        }
    }

    #[test]
    fn test_degenerate_points_rejected() {
        let src = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let dst = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
        assert!(estimate_homography(&src, &dst).is_none());
    }

    #[test]
    fn test_too_few_points() {
        assert!(estimate_homography(&[(0.0, 0.0)], &[(1.0, 1.0)]).is_none());
    }
}
