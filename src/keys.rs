//! 操作员按键命令

use phf::phf_map;

/// 单字符按键对应的离散命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    ToggleRotation,
    ToggleImageProcMode,
    CycleDrawMode,
    CycleThresholdMode,
    CyclePatternDetectionMode,
    ThresholdDown,
    ThresholdUp,
    ToggleDebug,
    RequestSnapshot,
    ToggleHelp,
    ToggleModeInfo,
}

/// 会话对命令的响应
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

static KEY_COMMANDS: phf::Map<char, Command> = phf_map! {
    '\u{1b}' => Command::Quit,
    'q' => Command::Quit,
    'Q' => Command::Quit,
    ' ' => Command::ToggleRotation,
    'x' => Command::ToggleImageProcMode,
    'X' => Command::ToggleImageProcMode,
    'c' => Command::CycleDrawMode,
    'C' => Command::CycleDrawMode,
    'a' => Command::CycleThresholdMode,
    'A' => Command::CycleThresholdMode,
    'p' => Command::CyclePatternDetectionMode,
    'P' => Command::CyclePatternDetectionMode,
    '-' => Command::ThresholdDown,
    '+' => Command::ThresholdUp,
    '=' => Command::ThresholdUp,
    'd' => Command::ToggleDebug,
    'D' => Command::ToggleDebug,
    's' => Command::RequestSnapshot,
    'S' => Command::RequestSnapshot,
    '?' => Command::ToggleHelp,
    '/' => Command::ToggleHelp,
    'm' => Command::ToggleModeInfo,
    'M' => Command::ToggleModeInfo,
};

/// 按键字符 → 命令, 未绑定的按键返回 None
pub fn command_for_key(key: char) -> Option<Command> {
    KEY_COMMANDS.get(&key).copied()
}

/// 屏幕帮助文字
pub const HELP_TEXT: [&str; 11] = [
    "Keys:",
    " ? or /        Show/hide this help.",
    " q or [esc]    Quit program.",
    " d             Activate / deactivate debug mode.",
    " m             Toggle display of mode info.",
    " a             Toggle between available threshold modes.",
    " - and +       Adjust manual threshold down/up by 5.",
    " x             Change image processing mode.",
    " c             Change background draw mode.",
    " p             Change pattern detection mode.",
    " s / [space]   Save a snapshot / toggle rotation.",
];
