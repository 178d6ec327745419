//! 3x3 矩阵码 (barcode) 解码
//!
//! 标记内部划分为 3x3 格. 左上角格为黑色定位格, 其余三个角格必须为白色;
//! 剩余五格 (上中, 左中, 中心, 右中, 下中) 依次为 ID 的 bit4..bit0, 黑色为1.

use super::types::PatternId;

pub const MATRIX_SIZE: usize = 3;

/// 最大可编码ID
pub const MAX_MATRIX_ID: PatternId = 31;

/// 黑白格最小灰度差, 低于此值视为无对比度
const MIN_CONTRAST: f64 = 40.0;

const CORNERS: [(usize, usize); 4] = [(0, 0), (0, 2), (2, 2), (2, 0)];
const DATA_CELLS: [(usize, usize); 5] = [(0, 1), (1, 0), (1, 1), (1, 2), (2, 1)];

/// 解码结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatrixDecode {
    /// 定位格所在角 (即图案左上角所在的顶点序号)
    pub direction: usize,
    pub id: PatternId,
    pub confidence: f64,
}

/// 由 3x3 格的平均灰度解码
pub fn decode(cells: &[[f64; MATRIX_SIZE]; MATRIX_SIZE]) -> Option<MatrixDecode> {
    let (min, max) = cells
        .iter()
        .flatten()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let contrast = max - min;
    if contrast < MIN_CONTRAST {
        return None;
    }
    let mid = (min + max) / 2.0;
    let dark = |(r, c): (usize, usize)| cells[r][c] < mid;

    // 恰好一个黑色角格
    let dark_corners: Vec<usize> = (0..4).filter(|&i| dark(CORNERS[i])).collect();
    if dark_corners.len() != 1 {
        return None;
    }
    let direction = dark_corners[0];

    // 逆时针旋转回标准方向
    let mut canonical = *cells;
    for _ in 0..direction {
        canonical = rotate_ccw(&canonical);
    }

    let id = DATA_CELLS
        .iter()
        .fold(0, |acc, &(r, c)| (acc << 1) | (canonical[r][c] < mid) as PatternId);

    // 可信度: 离中值最近的格的相对裕度
    let margin = cells
        .iter()
        .flatten()
        .map(|v| (v - mid).abs())
        .fold(f64::MAX, f64::min);
    let confidence = (margin / (contrast / 2.0)).clamp(0.0, 1.0);

    Some(MatrixDecode {
        direction,
        id,
        confidence,
    })
}

/// 按标准方向生成 ID 的黑格布局 (`true` 为黑)
pub fn encode(id: PatternId) -> Option<[[bool; MATRIX_SIZE]; MATRIX_SIZE]> {
    if !(0..=MAX_MATRIX_ID).contains(&id) {
        return None;
    }
    let mut cells = [[false; MATRIX_SIZE]; MATRIX_SIZE];
    cells[0][0] = true;
    for (bit, &(r, c)) in DATA_CELLS.iter().enumerate() {
        cells[r][c] = (id >> (4 - bit)) & 1 == 1;
    }
    Some(cells)
}

fn rotate_ccw(g: &[[f64; MATRIX_SIZE]; MATRIX_SIZE]) -> [[f64; MATRIX_SIZE]; MATRIX_SIZE] {
    let mut out = [[0.0; MATRIX_SIZE]; MATRIX_SIZE];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = g[j][MATRIX_SIZE - 1 - i];
        }
    }
    out
}
