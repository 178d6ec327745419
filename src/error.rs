//! 错误类型
//! Error types for the tracking pipeline

use std::path::PathBuf;
use thiserror::Error;

/// AR 跟踪系统错误
///
/// 启动阶段的错误 (视频源/相机参数/标记/模型) 一律终止启动;
/// 运行期只有检测器错误是致命的, 快照写入失败仅记录日志.
#[derive(Debug, Error)]
pub enum ArError {
    #[error("无法打开视频源 {source_name}: {reason}")]
    SourceOpen { source_name: String, reason: String },

    #[error("视频源使用了不支持的像素格式")]
    UnsupportedPixelFormat,

    #[error("相机参数文件 {path} 加载失败: {reason}")]
    CameraParam { path: PathBuf, reason: String },

    #[error("标记模板 {path} 加载失败: {reason}")]
    Pattern { path: PathBuf, reason: String },

    #[error("模型文件 {path} 加载失败: {reason}")]
    Model { path: PathBuf, reason: String },

    #[error("配置文件 {path} 无效: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("标记检测失败: {0}")]
    Detection(String),

    #[error("位姿估计失败: {0}")]
    PoseEstimation(String),

    #[error("快照保存失败 {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArError>;
