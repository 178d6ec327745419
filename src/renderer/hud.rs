//! HUD 文字排版 (模式信息 + 按键帮助)
//!
//! 坐标为屏幕坐标 (原点左上, y 向下), `HudLine::y` 为文字行顶部.

use crate::keys::HELP_TEXT;
use crate::ui_config::{ArConfig, HudLevel};

/// 字符高度 (像素)
pub const CHAR_HEIGHT: f32 = 10.0;
/// 行间距
pub const LINE_SPACING: f32 = 2.0;
/// 距窗口边缘
pub const HUD_MARGIN: f32 = 2.0;

/// 文字宽度测量 (由渲染后端提供)
pub trait TextMetrics {
    fn text_width(&self, text: &str) -> f32;
}

/// 背景矩形
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HudRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HudLine {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// 一个文字块: 先画半透明黑色背景, 再画文字
#[derive(Clone, Debug, PartialEq)]
pub struct HudBlock {
    pub backing: HudRect,
    pub lines: Vec<HudLine>,
}

/// HUD 需要的运行时状态
#[derive(Clone, Copy, Debug)]
pub struct HudState<'a> {
    pub config: &'a ArConfig,
    pub frame_size: (u32, u32),
    /// 检测器上一次实际使用的全局阈值
    pub threshold: Option<u8>,
    pub border: f64,
    pub window: (u32, u32),
}

/// 模式信息文字 (4行)
pub fn mode_info_lines(state: &HudState) -> Vec<String> {
    let config = state.config;

    let mut threshold_line = format!("Threshold mode: {}", config.threshold_mode.label());
    if config.threshold_mode.has_global_threshold() {
        let level = state.threshold.unwrap_or(config.threshold);
        threshold_line.push_str(&format!(", thresh={}", level));
    }

    vec![
        format!(
            "Processing {}x{} video frames {}",
            state.frame_size.0,
            state.frame_size.1,
            config.image_proc_mode.label()
        ),
        threshold_line,
        format!(
            "Border: {:.1}%, Pattern detection mode: {}",
            state.border * 100.0,
            config.pattern_detection_mode.label()
        ),
        format!(
            "Drawing using {} into {}x{} window",
            config.draw_mode.label(),
            state.window.0,
            state.window.1
        ),
    ]
}

fn block_height(lines: usize) -> f32 {
    if lines == 0 {
        return 0.0;
    }
    lines as f32 * CHAR_HEIGHT + (lines - 1) as f32 * LINE_SPACING
}

fn block_width(lines: &[String], metrics: &dyn TextMetrics) -> f32 {
    lines
        .iter()
        .map(|l| metrics.text_width(l))
        .fold(0.0, f32::max)
}

/// 左上角排版, 自上而下
pub fn layout_top_left(lines: Vec<String>, metrics: &dyn TextMetrics) -> HudBlock {
    let backing = HudRect {
        x: HUD_MARGIN,
        y: HUD_MARGIN,
        w: block_width(&lines, metrics),
        h: block_height(lines.len()),
    };
    let lines = lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| HudLine {
            text,
            x: HUD_MARGIN,
            y: HUD_MARGIN + i as f32 * (CHAR_HEIGHT + LINE_SPACING),
        })
        .collect();
    HudBlock { backing, lines }
}

/// 左下角排版, 最后一行贴近底边
pub fn layout_bottom_left(lines: Vec<String>, metrics: &dyn TextMetrics, window_h: f32) -> HudBlock {
    let h = block_height(lines.len());
    let top = window_h - HUD_MARGIN - h;
    let backing = HudRect {
        x: HUD_MARGIN,
        y: top,
        w: block_width(&lines, metrics),
        h,
    };
    let lines = lines
        .into_iter()
        .enumerate()
        .map(|(i, text)| HudLine {
            text,
            x: HUD_MARGIN,
            y: top + i as f32 * (CHAR_HEIGHT + LINE_SPACING),
        })
        .collect();
    HudBlock { backing, lines }
}

/// 按配置生成 0~2 个文字块
pub fn build_hud(state: &HudState, metrics: &dyn TextMetrics) -> Vec<HudBlock> {
    let mut blocks = Vec::with_capacity(2);
    if state.config.hud == HudLevel::ModeInfo {
        blocks.push(layout_top_left(mode_info_lines(state), metrics));
    }
    if state.config.show_help {
        let help = HELP_TEXT.iter().map(|s| s.to_string()).collect();
        blocks.push(layout_bottom_left(help, metrics, state.window.1 as f32));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui_config::ThresholdMode;

    /// 等宽字体: 每字符6像素
    struct Mono;
    impl TextMetrics for Mono {
        fn text_width(&self, text: &str) -> f32 {
            text.chars().count() as f32 * 6.0
        }
    }

    fn state(config: &ArConfig) -> HudState<'_> {
        HudState {
            config,
            frame_size: (640, 480),
            threshold: Some(87),
            border: 0.25,
            window: (640, 480),
        }
    }

    #[test]
    fn test_mode_info_text() {
        let config = ArConfig::default();
        let lines = mode_info_lines(&state(&config));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Processing 640x480 video frames full frame");
        assert_eq!(lines[1], "Threshold mode: MANUAL, thresh=87");
        assert!(lines[2].starts_with("Border: 25.0%, Pattern detection mode: Colour template"));
        assert_eq!(lines[3], "Drawing using texture mapping into 640x480 window");
    }

    #[test]
    fn test_adaptive_mode_hides_threshold() {
        let config = ArConfig {
            threshold_mode: ThresholdMode::AutoAdaptive,
            ..Default::default()
        };
        assert_eq!(mode_info_lines(&state(&config))[1], "Threshold mode: AUTO_ADAPTIVE");
    }

    #[test]
    fn test_backing_rect_fits_text() {
        let lines = vec!["abc".to_string(), "abcdef".to_string()];
        let block = layout_top_left(lines, &Mono);
        assert_eq!(block.backing, HudRect { x: 2.0, y: 2.0, w: 36.0, h: 22.0 });
        assert_eq!(block.lines[1].y, 14.0);
    }

    #[test]
    fn test_help_block_sits_on_bottom_edge() {
        let config = ArConfig::default();
        let blocks = build_hud(&state(&config), &Mono);
        assert_eq!(blocks.len(), 2);
        let help = &blocks[1];
        let n = HELP_TEXT.len() as f32;
        assert_eq!(help.backing.h, n * 10.0 + (n - 1.0) * 2.0);
        assert_eq!(help.backing.y + help.backing.h, 478.0);
        assert_eq!(help.lines[0].text, "Keys:");
    }

    #[test]
    fn test_hud_blocks_follow_flags() {
        let config = ArConfig {
            hud: HudLevel::Off,
            show_help: false,
            ..Default::default()
        };
        assert!(build_hud(&state(&config), &Mono).is_empty());

        let help_only = ArConfig {
            hud: HudLevel::Off,
            ..Default::default()
        };
        let blocks = build_hud(&state(&help_only), &Mono);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines.len(), HELP_TEXT.len());
    }
}
