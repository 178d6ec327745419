#![allow(clippy::type_complexity)]
pub mod camera_param; // 相机内参
pub mod detection; // 标记检测系统
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod keys; // 按键命令
pub mod logging; // 日志初始化
pub mod models; // 三维模型
pub mod pose; // 位姿估计
pub mod renderer; // 渲染计划
pub mod renderer_macroquad; // macroquad 渲染后端
pub mod tracking; // 跟踪渲染循环
pub mod ui_config; // 运行时配置
pub mod utils; // 几何工具

pub use crate::camera_param::CameraParam;
pub use crate::error::{ArError, Result};
pub use crate::keys::{command_for_key, Command, Control};
pub use crate::tracking::{ArSession, SessionSettings, TickOutcome};
pub use crate::ui_config::ArConfig;
