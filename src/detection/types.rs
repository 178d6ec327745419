/// 标记检测数据结构定义
/// Data structures for marker detection
use image::GrayImage;

// ========== 公共常量 ==========

/// 未识别图案的方形标记
pub const UNKNOWN_PATTERN: PatternId = -1;

/// 模板匹配的最低可信度, 低于此值视为未识别
pub const MIN_PATTERN_CONFIDENCE: f64 = 0.5;

// ========== 数据结构 ==========

/// 标记图案ID (-1 表示未识别)
pub type PatternId = i32;

/// 标记在图像中的几何信息
///
/// 顶点按顺时针排列, 顶点0为图案左上角.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerGeometry {
    pub vertices: [(f64, f64); 4],
    pub center: (f64, f64),
    pub area: f64, // 像素面积
}

impl MarkerGeometry {
    /// 由四个顶点构造, 自动计算中心与面积
    pub fn from_vertices(vertices: [(f64, f64); 4]) -> Self {
        let center = (
            vertices.iter().map(|v| v.0).sum::<f64>() / 4.0,
            vertices.iter().map(|v| v.1).sum::<f64>() / 4.0,
        );
        Self {
            vertices,
            center,
            area: polygon_area(&vertices),
        }
    }

    /// 顶点整体旋转, 使原顶点 `shift` 成为新的顶点0
    pub fn rotated(&self, shift: usize) -> Self {
        let mut vertices = self.vertices;
        vertices.rotate_left(shift % 4);
        Self {
            vertices,
            center: self.center,
            area: self.area,
        }
    }

    /// 坐标缩放 (半分辨率处理后还原到原图坐标)
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self::from_vertices(self.vertices.map(|(x, y)| (x * sx, y * sy)))
    }
}

/// 鞋带公式求多边形面积
pub fn polygon_area(vertices: &[(f64, f64)]) -> f64 {
    let n = vertices.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (x1, y1) = vertices[i];
            let (x2, y2) = vertices[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum();
    twice.abs() / 2.0
}

/// 单帧中的一个候选标记 (每帧重新生成, 帧结束即丢弃)
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerCandidate {
    pub id: PatternId,
    pub confidence: f64, // 0.0 - 1.0
    pub geometry: MarkerGeometry,
}

/// 一次检测的完整输出
#[derive(Clone, Debug, Default)]
pub struct Detection {
    pub candidates: Vec<MarkerCandidate>,
    /// 实际使用的全局阈值 (自适应模式为 None)
    pub threshold: Option<u8>,
    /// 二值化图像 (仅调试模式输出)
    pub debug_image: Option<GrayImage>,
}
