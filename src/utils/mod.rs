/// 工具模块
/// Utility modules
pub mod homography;

pub use homography::{estimate_homography, project, unit_square_to_quad};
