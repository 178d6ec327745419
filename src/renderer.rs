//! 渲染计划 (Render Plan)
//!
//! 每次绘制前由会话生成 `ScenePlan`, 只含纯数据 (背景/矩阵/HUD),
//! 由 `renderer_macroquad` 后端负责实际绘制.
//!
//! 矩阵均为 OpenGL 约定 (右手系, 相机看向 -Z, NDC 深度 [-1, 1]).

pub mod hud;

pub use hud::{build_hud, HudBlock, HudLine, HudRect, HudState, TextMetrics};

use crate::camera_param::CameraParam;
use crate::input::Frame;
use crate::pose::Pose;
use crate::ui_config::DrawMode;
use image::GrayImage;
use nalgebra::{Matrix4, Vector3};

/// 近裁剪面 (毫米)
pub const VIEW_DISTANCE_MIN: f64 = 40.0;
/// 远裁剪面 (毫米)
pub const VIEW_DISTANCE_MAX: f64 = 10000.0;
/// 位姿平移 → 显示单位
pub const VIEW_SCALEFACTOR: f64 = 1.0;

/// 背景内容 (每帧最多上传一次)
#[derive(Clone, Debug)]
pub enum Background {
    Video(Frame),
    /// 调试模式: 检测器的二值化图像
    Debug(GrayImage),
}

/// 一次绘制所需的全部数据
#[derive(Clone, Debug)]
pub struct ScenePlan {
    /// 新背景; None 表示沿用上次上传的纹理
    pub background: Option<Background>,
    pub draw_mode: DrawMode,
    pub projection: Matrix4<f64>,
    /// 本轮未找到标记时为 None, 此时不绘制物体
    pub view: Option<Matrix4<f64>>,
    pub object: Matrix4<f64>,
    pub hud: Vec<HudBlock>,
}

impl ScenePlan {
    /// 物体的 模型-视图-投影 矩阵 (未找到标记时为 None)
    pub fn object_mvp(&self) -> Option<Matrix4<f64>> {
        self.view.map(|view| self.projection * view * self.object)
    }
}

/// 由相机内参生成 OpenGL 透视投影矩阵
///
/// 图像坐标 y 向下, 因此 y 行取反后与 GL 的 y 向上一致.
pub fn projection_matrix(param: &CameraParam, near: f64, far: f64) -> Matrix4<f64> {
    let k = param.intrinsics();
    // 归一化使 k[2][2] == 1
    let k = if k[(2, 2)].abs() > f64::EPSILON {
        k / k[(2, 2)]
    } else {
        k
    };
    let w = param.xsize as f64;
    let h = param.ysize as f64;

    let (fx, s, cx) = (k[(0, 0)], k[(0, 1)], k[(0, 2)]);
    let (fy, cy) = (k[(1, 1)], k[(1, 2)]);

    Matrix4::new(
        2.0 * fx / w,
        -2.0 * s / w,
        1.0 - 2.0 * cx / w,
        0.0,
        //
        0.0,
        2.0 * fy / h,
        2.0 * cy / h - 1.0,
        0.0,
        //
        0.0,
        0.0,
        -(far + near) / (far - near),
        -2.0 * far * near / (far - near),
        //
        0.0,
        0.0,
        -1.0,
        0.0,
    )
}

/// 位姿 → OpenGL 视图矩阵 (标记坐标 → GL 相机坐标)
///
/// 视觉相机坐标 (y 向下, z 向前) 绕 X 轴翻转 180° 得到 GL 相机坐标.
pub fn camera_view(pose: &Pose, scale: f64) -> Matrix4<f64> {
    let r = pose.rotation();
    let t = pose.translation() * scale;

    let mut cv = Matrix4::identity();
    cv.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    cv.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);

    let flip = Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0));
    flip * cv
}

/// 物体模型矩阵: 绕标记 Z 轴旋转, 底面落在标记平面上
pub fn object_transform(angle_deg: f32, half_height: f32) -> Matrix4<f64> {
    let rotation = Matrix4::from_axis_angle(&Vector3::z_axis(), (angle_deg as f64).to_radians());
    let lift = Matrix4::new_translation(&Vector3::new(0.0, 0.0, half_height as f64));
    rotation * lift
}
