/// 标记检测系统 (Marker Detection System)
///
/// - SquareMarkerDetector: 二值化 + 轮廓 + 四边形, 模板/矩阵码识别
/// - select_best:          同一图案多个候选时取可信度最高者
pub mod detector;
pub mod matrix_code;
pub mod pattern;
pub mod selector;
pub mod types;

pub use detector::SquareMarkerDetector;
pub use pattern::PatternTemplate;
pub use selector::select_best;
pub use types::{Detection, MarkerCandidate, MarkerGeometry, PatternId, UNKNOWN_PATTERN};

use crate::error::Result;
use crate::input::Frame;
use crate::ui_config::ArConfig;

/// 标记检测器接口
///
/// 检测参数 (阈值模式/处理模式/识别模式) 每帧从 `ArConfig` 读取, 运行中可随时切换.
pub trait MarkerDetector {
    fn detect(&mut self, frame: &Frame, config: &ArConfig) -> Result<Detection>;
}
