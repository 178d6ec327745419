/// 三维模型
///
/// - ObjModel: Wavefront OBJ 三角网格, 启动时加载一次, 归一化后按物体尺寸缩放
pub mod obj;

pub use obj::{ObjModel, Triangle};

use crate::error::Result;
use std::path::Path;

/// 加载并准备锚定物体: 归一化 → (可选) Y轴朝上转换 → 缩放到 `1.5 * object_size`
pub fn load_anchored_model(path: &Path, object_size: f32, y_up: bool) -> Result<ObjModel> {
    let mut model = ObjModel::load(path)?;
    model.unitize();
    if y_up {
        model.y_up_to_z_up();
    }
    model.scale(1.5 * object_size);
    Ok(model)
}
