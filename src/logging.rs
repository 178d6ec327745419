//! 日志初始化

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化控制台日志
///
/// `RUST_LOG` 优先; 未设置时 `debug_mode` 决定 debug/info 级别.
/// 重复调用 (例如测试中) 直接忽略.
pub fn init(debug_mode: bool) {
    let default_level = if debug_mode { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!("日志初始化完成: level={}", default_level);
    }
}
