//! 运行时配置 - 操作员通过按键实时调整, 初始值可从JSON文件加载

use crate::error::{ArError, Result};
use crate::keys::Command;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// 手动阈值每次调整的步长
pub const THRESHOLD_STEP: i32 = 5;

/// 默认二值化阈值
pub const DEFAULT_THRESHOLD: u8 = 100;

/// 二值化阈值模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    Manual,
    AutoMedian,
    AutoOtsu,
    AutoAdaptive,
}

impl ThresholdMode {
    /// 手动 → 中值 → Otsu → 自适应 → 手动
    pub fn next(self) -> Self {
        match self {
            ThresholdMode::Manual => ThresholdMode::AutoMedian,
            ThresholdMode::AutoMedian => ThresholdMode::AutoOtsu,
            ThresholdMode::AutoOtsu => ThresholdMode::AutoAdaptive,
            ThresholdMode::AutoAdaptive => ThresholdMode::Manual,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThresholdMode::Manual => "MANUAL",
            ThresholdMode::AutoMedian => "AUTO_MEDIAN",
            ThresholdMode::AutoOtsu => "AUTO_OTSU",
            ThresholdMode::AutoAdaptive => "AUTO_ADAPTIVE",
        }
    }

    /// 自适应模式没有单一的全局阈值
    pub fn has_global_threshold(self) -> bool {
        !matches!(self, ThresholdMode::AutoAdaptive)
    }
}

/// 图像处理模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageProcMode {
    /// 处理完整帧
    FullFrame,
    /// 仅处理偶数场 (半分辨率)
    Field,
}

impl ImageProcMode {
    pub fn toggle(self) -> Self {
        match self {
            ImageProcMode::FullFrame => ImageProcMode::Field,
            ImageProcMode::Field => ImageProcMode::FullFrame,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImageProcMode::FullFrame => "full frame",
            ImageProcMode::Field => "even field only",
        }
    }
}

/// 标记图案识别模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternDetectionMode {
    TemplateColor,
    TemplateMono,
    MatrixCode,
    TemplateColorAndMatrix,
    TemplateMonoAndMatrix,
}

impl PatternDetectionMode {
    pub fn next(self) -> Self {
        match self {
            PatternDetectionMode::TemplateColor => PatternDetectionMode::TemplateMono,
            PatternDetectionMode::TemplateMono => PatternDetectionMode::MatrixCode,
            PatternDetectionMode::MatrixCode => PatternDetectionMode::TemplateColorAndMatrix,
            PatternDetectionMode::TemplateColorAndMatrix => {
                PatternDetectionMode::TemplateMonoAndMatrix
            }
            PatternDetectionMode::TemplateMonoAndMatrix => PatternDetectionMode::TemplateColor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternDetectionMode::TemplateColor => "Colour template (pattern)",
            PatternDetectionMode::TemplateMono => "Mono template (pattern)",
            PatternDetectionMode::MatrixCode => "Matrix (barcode)",
            PatternDetectionMode::TemplateColorAndMatrix => {
                "Colour template + Matrix (2 pass, pattern + barcode)"
            }
            PatternDetectionMode::TemplateMonoAndMatrix => {
                "Mono template + Matrix (2 pass, pattern + barcode)"
            }
        }
    }

    pub fn uses_template(self) -> bool {
        !matches!(self, PatternDetectionMode::MatrixCode)
    }

    pub fn uses_matrix(self) -> bool {
        matches!(
            self,
            PatternDetectionMode::MatrixCode
                | PatternDetectionMode::TemplateColorAndMatrix
                | PatternDetectionMode::TemplateMonoAndMatrix
        )
    }

    pub fn is_mono(self) -> bool {
        matches!(
            self,
            PatternDetectionMode::TemplateMono | PatternDetectionMode::TemplateMonoAndMatrix
        )
    }
}

/// 背景视频绘制模式 (三态循环, 单一枚举避免非法组合)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    /// 每帧新建像素纹理直接贴出
    PixelBlit,
    /// 复用纹理, 上传完整帧
    TextureFull,
    /// 复用纹理, 仅上传偶数行
    TextureHalf,
}

impl DrawMode {
    pub fn next(self) -> Self {
        match self {
            DrawMode::PixelBlit => DrawMode::TextureFull,
            DrawMode::TextureFull => DrawMode::TextureHalf,
            DrawMode::TextureHalf => DrawMode::PixelBlit,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DrawMode::PixelBlit => "pixel blit",
            DrawMode::TextureFull => "texture mapping",
            DrawMode::TextureHalf => "texture mapping (even field only)",
        }
    }
}

/// HUD 显示级别
///
/// 按键只在 Off 与 ModeInfo 之间切换; 帮助文字由独立的 `show_help` 控制.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HudLevel {
    Off,
    ModeInfo,
}

impl HudLevel {
    pub fn toggle(self) -> Self {
        match self {
            HudLevel::Off => HudLevel::ModeInfo,
            HudLevel::ModeInfo => HudLevel::Off,
        }
    }
}

/// 运行时参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArConfig {
    // === 检测参数 ===
    pub threshold_mode: ThresholdMode,
    pub threshold: u8, // 手动阈值 (0-255)
    pub image_proc_mode: ImageProcMode,
    pub pattern_detection_mode: PatternDetectionMode,

    // === 显示参数 ===
    pub draw_mode: DrawMode,
    pub debug: bool, // 调试模式: 显示二值化图像
    pub hud: HudLevel,
    pub show_help: bool,
    pub rotate: bool, // 模型旋转动画
}

impl Default for ArConfig {
    fn default() -> Self {
        Self {
            threshold_mode: ThresholdMode::Manual,
            threshold: DEFAULT_THRESHOLD,
            image_proc_mode: ImageProcMode::FullFrame,
            pattern_detection_mode: PatternDetectionMode::TemplateColor,

            draw_mode: DrawMode::TextureFull,
            debug: false,
            hud: HudLevel::ModeInfo,
            show_help: true,
            rotate: true,
        }
    }
}

impl ArConfig {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    ///
    /// 文件存在但无法读取或解析时返回错误, 不会覆盖原文件.
    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |reason: String| ArError::Config {
            path: path.to_path_buf(),
            reason,
        };

        match fs::read_to_string(path) {
            Ok(json) => {
                let config =
                    serde_json::from_str(&json).map_err(|e| config_error(e.to_string()))?;
                tracing::info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                Ok(config)
            }
            Err(e) => Err(config_error(e.to_string())),
        }
    }

    /// 保存配置到JSON文件 (失败仅记录日志)
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    tracing::warn!("❌ 保存配置失败: {}", e);
                } else {
                    tracing::info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => tracing::warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 手动阈值增减, 结果钳制在 [0, 255]
    pub fn adjust_threshold(&mut self, delta: i32) {
        self.threshold = (self.threshold as i32 + delta).clamp(0, 255) as u8;
    }

    /// 应用一条配置命令
    ///
    /// `Quit` 与 `RequestSnapshot` 不属于配置状态, 在此为空操作.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::ToggleRotation => self.rotate = !self.rotate,
            Command::ToggleImageProcMode => self.image_proc_mode = self.image_proc_mode.toggle(),
            Command::CycleDrawMode => self.draw_mode = self.draw_mode.next(),
            Command::CycleThresholdMode => self.threshold_mode = self.threshold_mode.next(),
            Command::CyclePatternDetectionMode => {
                self.pattern_detection_mode = self.pattern_detection_mode.next()
            }
            Command::ThresholdDown => self.adjust_threshold(-THRESHOLD_STEP),
            Command::ThresholdUp => self.adjust_threshold(THRESHOLD_STEP),
            Command::ToggleDebug => self.debug = !self.debug,
            Command::ToggleHelp => self.show_help = !self.show_help,
            Command::ToggleModeInfo => self.hud = self.hud.toggle(),
            Command::RequestSnapshot | Command::Quit => {}
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        tracing::info!("🎛️  当前检测配置:");
        tracing::info!(
            "  阈值模式: {} (thresh={})",
            self.threshold_mode.label(),
            self.threshold
        );
        tracing::info!("  图像处理: {}", self.image_proc_mode.label());
        tracing::info!("  图案识别: {}", self.pattern_detection_mode.label());
        tracing::info!("  绘制模式: {}", self.draw_mode.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_clamps_high() {
        let mut config = ArConfig {
            threshold: 253,
            ..Default::default()
        };
        config.apply(Command::ThresholdUp);
        assert_eq!(config.threshold, 255);
    }

    #[test]
    fn test_threshold_clamps_low() {
        let mut config = ArConfig {
            threshold: 2,
            ..Default::default()
        };
        config.apply(Command::ThresholdDown);
        assert_eq!(config.threshold, 0);
    }

    #[test]
    fn test_threshold_adjusts_in_auto_mode() {
        let mut config = ArConfig {
            threshold_mode: ThresholdMode::AutoOtsu,
            ..Default::default()
        };
        config.apply(Command::ThresholdUp);
        assert_eq!(config.threshold, DEFAULT_THRESHOLD + 5);
        assert_eq!(config.threshold_mode, ThresholdMode::AutoOtsu);
    }

    #[test]
    fn test_draw_mode_three_cycle() {
        let mut config = ArConfig {
            draw_mode: DrawMode::PixelBlit,
            ..Default::default()
        };
        config.apply(Command::CycleDrawMode);
        assert_eq!(config.draw_mode, DrawMode::TextureFull);
        config.apply(Command::CycleDrawMode);
        assert_eq!(config.draw_mode, DrawMode::TextureHalf);
        config.apply(Command::CycleDrawMode);
        assert_eq!(config.draw_mode, DrawMode::PixelBlit);
    }

    #[test]
    fn test_threshold_mode_cycle() {
        let mut mode = ThresholdMode::Manual;
        let mut seen = vec![mode];
        for _ in 0..4 {
            mode = mode.next();
            seen.push(mode);
        }
        assert_eq!(
            seen,
            vec![
                ThresholdMode::Manual,
                ThresholdMode::AutoMedian,
                ThresholdMode::AutoOtsu,
                ThresholdMode::AutoAdaptive,
                ThresholdMode::Manual,
            ]
        );
    }

    #[test]
    fn test_hud_is_two_state() {
        let mut config = ArConfig::default();
        assert_eq!(config.hud, HudLevel::ModeInfo);
        config.apply(Command::ToggleModeInfo);
        assert_eq!(config.hud, HudLevel::Off);
        config.apply(Command::ToggleModeInfo);
        assert_eq!(config.hud, HudLevel::ModeInfo);
        // 帮助文字独立切换
        config.apply(Command::ToggleHelp);
        assert!(!config.show_help);
        assert_eq!(config.hud, HudLevel::ModeInfo);
    }

    #[test]
    fn test_pattern_mode_cycle_returns() {
        let start = PatternDetectionMode::TemplateColor;
        let mut mode = start;
        for _ in 0..5 {
            mode = mode.next();
        }
        assert_eq!(mode, start);
    }

    #[test]
    fn test_load_creates_default_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simplear.json");
        let config = ArConfig::load(&path).unwrap();
        assert_eq!(config, ArConfig::default());
        assert!(path.exists());

        let edited = ArConfig {
            threshold: 42,
            draw_mode: DrawMode::TextureHalf,
            ..Default::default()
        };
        edited.save(&path);
        assert_eq!(ArConfig::load(&path).unwrap(), edited);
    }

    #[test]
    fn test_unreadable_config_is_reported_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simplear.json");
        let bytes = b"{\xff\xfe}".to_vec();
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(ArConfig::load(&path), Err(ArError::Config { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ArConfig::load(&path), Err(ArError::Config { .. })));
    }
}
