//! Wavefront OBJ 模型加载
//!
//! 支持 `v` / `vn` / `f` (多边形按扇形三角化, 支持负索引) 与 `usemtl` + `.mtl` 漫反射色.
//! 加载后居中并归一化到 [-1, 1] 立方体, 再按物体尺寸缩放.

use crate::error::{ArError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 材质缺省漫反射色
pub const DEFAULT_DIFFUSE: [f32; 3] = [0.8, 0.8, 0.8];

/// 一个三角面
#[derive(Clone, Debug, PartialEq)]
pub struct Triangle {
    pub positions: [[f32; 3]; 3],
    pub normals: [[f32; 3]; 3],
    pub color: [f32; 3],
}

/// 三角网格模型 (加载后不再修改)
#[derive(Clone, Debug)]
pub struct ObjModel {
    pub name: String,
    pub triangles: Vec<Triangle>,
}

impl ObjModel {
    /// 加载OBJ文件 (同目录下的 mtllib 可选)
    pub fn load(path: &Path) -> Result<Self> {
        let model_error = |reason: String| ArError::Model {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| model_error(e.to_string()))?;

        // 材质库
        let mut materials = HashMap::new();
        for line in text.lines() {
            if let Some(lib) = line.trim().strip_prefix("mtllib ") {
                let mtl_path = path.with_file_name(lib.trim());
                match fs::read_to_string(&mtl_path) {
                    Ok(mtl) => materials.extend(parse_mtl(&mtl)),
                    Err(e) => tracing::warn!("⚠️ 材质文件 {} 读取失败: {}", mtl_path.display(), e),
                }
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let model = Self::parse(&name, &text, &materials).map_err(model_error)?;
        tracing::info!("🐰 模型已加载: {} ({} 个三角面)", model.name, model.triangles.len());
        Ok(model)
    }

    /// 解析OBJ文本
    pub fn parse(
        name: &str,
        text: &str,
        materials: &HashMap<String, [f32; 3]>,
    ) -> std::result::Result<Self, String> {
        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut normals: Vec<[f32; 3]> = Vec::new();
        let mut triangles = Vec::new();
        let mut color = DEFAULT_DIFFUSE;

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };
            let at = |msg: String| format!("第 {} 行: {}", line_no + 1, msg);

            match keyword {
                "v" => positions.push(parse_vec3(tokens).map_err(at)?),
                "vn" => normals.push(parse_vec3(tokens).map_err(at)?),
                "usemtl" => {
                    let material = tokens.next().unwrap_or_default();
                    color = materials.get(material).copied().unwrap_or(DEFAULT_DIFFUSE);
                }
                "f" => {
                    let corners = tokens
                        .map(|tok| parse_face_vertex(tok, positions.len(), normals.len()))
                        .collect::<std::result::Result<Vec<_>, String>>()
                        .map_err(at)?;
                    if corners.len() < 3 {
                        return Err(at("面的顶点数少于3".to_string()));
                    }
                    // 扇形三角化
                    for i in 1..corners.len() - 1 {
                        let tri = [corners[0], corners[i], corners[i + 1]];
                        triangles.push(build_triangle(&tri, &positions, &normals, color));
                    }
                }
                _ => {}
            }
        }

        if triangles.is_empty() {
            return Err("模型不包含任何面".to_string());
        }
        Ok(Self {
            name: name.to_string(),
            triangles,
        })
    }

    /// 包围盒 (min, max)
    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in self.triangles.iter().flat_map(|t| t.positions.iter()) {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        (min, max)
    }

    /// 居中并缩放到 [-1, 1] 立方体, 返回缩放系数
    pub fn unitize(&mut self) -> f32 {
        let (min, max) = self.bounds();
        let center = [0, 1, 2].map(|a| (min[a] + max[a]) / 2.0);
        let extent = (0..3).map(|a| max[a] - min[a]).fold(0.0f32, f32::max);
        let scale = if extent > 0.0 { 2.0 / extent } else { 1.0 };

        for p in self.triangles.iter_mut().flat_map(|t| t.positions.iter_mut()) {
            for axis in 0..3 {
                p[axis] = (p[axis] - center[axis]) * scale;
            }
        }
        scale
    }

    /// 均匀缩放
    pub fn scale(&mut self, factor: f32) {
        for p in self.triangles.iter_mut().flat_map(|t| t.positions.iter_mut()) {
            for v in p.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Y轴朝上的模型转为Z轴朝上 (绕X轴旋转90°)
    pub fn y_up_to_z_up(&mut self) {
        let convert = |v: &mut [f32; 3]| {
            let (y, z) = (v[1], v[2]);
            v[1] = -z;
            v[2] = y;
        };
        for t in self.triangles.iter_mut() {
            t.positions.iter_mut().for_each(convert);
            t.normals.iter_mut().for_each(convert);
        }
    }

    /// Z方向高度的一半 (底面放在标记平面上所需的平移量)
    pub fn half_height(&self) -> f32 {
        let (min, max) = self.bounds();
        (max[2] - min[2]) / 2.0
    }
}

/// 解析 `.mtl` 中的 `newmtl` / `Kd`
pub fn parse_mtl(text: &str) -> HashMap<String, [f32; 3]> {
    let mut materials = HashMap::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("newmtl") => {
                current = tokens.next().map(str::to_string);
                if let Some(name) = &current {
                    materials.insert(name.clone(), DEFAULT_DIFFUSE);
                }
            }
            Some("Kd") => {
                if let (Some(name), Ok(kd)) = (&current, parse_vec3(tokens)) {
                    materials.insert(name.clone(), kd);
                }
            }
            _ => {}
        }
    }
    materials
}

fn parse_vec3<'a>(mut tokens: impl Iterator<Item = &'a str>) -> std::result::Result<[f32; 3], String> {
    let mut out = [0.0f32; 3];
    for v in out.iter_mut() {
        let tok = tokens.next().ok_or_else(|| "坐标分量不足".to_string())?;
        *v = tok.parse().map_err(|_| format!("非法数值: {}", tok))?;
    }
    Ok(out)
}

/// 面顶点 `v`, `v/vt`, `v//vn`, `v/vt/vn` → (位置索引, 法线索引)
fn parse_face_vertex(
    token: &str,
    position_count: usize,
    normal_count: usize,
) -> std::result::Result<(usize, Option<usize>), String> {
    let mut parts = token.split('/');
    let position = parts
        .next()
        .ok_or_else(|| format!("非法面顶点: {}", token))
        .and_then(|s| resolve_index(s, position_count))?;
    let _texcoord = parts.next();
    let normal = match parts.next() {
        Some(s) if !s.is_empty() => Some(resolve_index(s, normal_count)?),
        _ => None,
    };
    Ok((position, normal))
}

/// OBJ 索引从1开始, 负数表示从末尾倒数
fn resolve_index(s: &str, count: usize) -> std::result::Result<usize, String> {
    let idx: i64 = s.parse().map_err(|_| format!("非法索引: {}", s))?;
    let resolved = match idx {
        i if i > 0 => i - 1,
        i if i < 0 => count as i64 + i,
        _ => return Err("索引不能为0".to_string()),
    };
    if resolved < 0 || resolved >= count as i64 {
        return Err(format!("索引越界: {} (共 {} 个)", s, count));
    }
    Ok(resolved as usize)
}

fn build_triangle(
    corners: &[(usize, Option<usize>); 3],
    positions: &[[f32; 3]],
    normals: &[[f32; 3]],
    color: [f32; 3],
) -> Triangle {
    let p = corners.map(|(pi, _)| positions[pi]);
    let face_normal = face_normal(&p);
    let n = corners.map(|(_, ni)| ni.map(|i| normals[i]).unwrap_or(face_normal));
    Triangle {
        positions: p,
        normals: n,
        color,
    }
}

fn face_normal(p: &[[f32; 3]; 3]) -> [f32; 3] {
    let a = [p[1][0] - p[0][0], p[1][1] - p[0][1], p[1][2] - p[0][2]];
    let b = [p[2][0] - p[0][0], p[2][1] - p[0][1], p[2][2] - p[0][2]];
    let n = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 0.0 {
        n.map(|v| v / len)
    } else {
        [0.0, 0.0, 1.0]
    }
}
