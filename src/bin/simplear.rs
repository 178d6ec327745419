use anyhow::{bail, Context};
use clap::Parser;
/// 单标记 AR 跟踪渲染 - macroquad GPU 渲染 + 单线程跟踪循环
///
/// 主程序入口 - 直接运行: cargo run --bin simplear --release
use macroquad::prelude::*;
use simplear_rs::detection::{PatternTemplate, SquareMarkerDetector};
use simplear_rs::input::{FrameSource, ImageSequenceSource};
use simplear_rs::models::load_anchored_model;
use simplear_rs::pose::SquarePoseEstimator;
use simplear_rs::renderer_macroquad::{MacroquadMetrics, MacroquadRenderer};
use simplear_rs::tracking::DEFAULT_TARGET_ID;
use simplear_rs::{command_for_key, logging, ArConfig, ArSession, CameraParam, Control, SessionSettings};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 图片序列的播放间隔 (约30fps)
const IMAGE_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// 单标记AR跟踪程序
#[derive(Parser, Debug)]
#[command(author, version, about = "单标记 AR 跟踪与渲染", long_about = None)]
struct Args {
    /// 视频源: camera:<序号> 或 图片文件/图片目录
    #[arg(short, long, default_value = "camera:0")]
    source: String,

    /// 相机参数文件 (.dat 或 .json)
    #[arg(long, default_value = "Data/camera_para.dat")]
    camera_param: PathBuf,

    /// 标记图案文件
    #[arg(short, long, default_value = "Data/patt.hiro")]
    pattern: PathBuf,

    /// OBJ 模型文件
    #[arg(short, long, default_value = "Data/bunny.obj")]
    model: PathBuf,

    /// 模型为 Y 轴朝上 (转换为 Z 轴朝上)
    #[arg(long)]
    model_y_up: bool,

    /// 标记物理边长 (毫米)
    #[arg(long, default_value_t = 80.0)]
    marker_width: f64,

    /// 物体尺寸 (毫米), 模型缩放到 1.5 倍
    #[arg(long, default_value_t = 40.0)]
    object_size: f32,

    /// 标记边框占边长比例
    #[arg(long, default_value_t = 0.25)]
    border: f64,

    /// 窗口/采集宽度
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// 窗口/采集高度
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// 全屏
    #[arg(long)]
    fullscreen: bool,

    /// 快照保存目录
    #[arg(long, default_value = ".")]
    snapshot_dir: PathBuf,

    /// 运行时配置 (不存在时创建默认配置)
    #[arg(long, default_value = "simplear.json")]
    config: PathBuf,

    /// 调试日志
    #[arg(long)]
    debug_log: bool,
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "simpleAR".to_string(),
        window_width: args.width as i32,
        window_height: args.height as i32,
        fullscreen: args.fullscreen,
        ..Default::default()
    }
}

/// 打开视频源
fn open_source(source_arg: &str, size: (u32, u32)) -> anyhow::Result<Box<dyn FrameSource>> {
    if let Some(index) = source_arg.strip_prefix("camera:") {
        let index: usize = index
            .parse()
            .with_context(|| format!("无效的摄像头序号: {}", index))?;
        return open_camera(index, size);
    }
    let source = ImageSequenceSource::open(std::path::Path::new(source_arg), IMAGE_FRAME_INTERVAL)?;
    Ok(Box::new(source))
}

#[cfg(feature = "camera")]
fn open_camera(index: usize, size: (u32, u32)) -> anyhow::Result<Box<dyn FrameSource>> {
    let source = simplear_rs::input::CameraSource::open(index, size)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "camera"))]
fn open_camera(index: usize, _size: (u32, u32)) -> anyhow::Result<Box<dyn FrameSource>> {
    bail!("摄像头 {} 不可用: 编译时未启用 camera 特性", index)
}

/// 启动: 任一步失败即终止, 已打开的视频源随之释放
fn setup(args: &Args) -> anyhow::Result<(ArSession, MacroquadRenderer)> {
    let config = ArConfig::load(&args.config).context("加载运行时配置失败")?;
    config.print_summary();

    let param = CameraParam::load(&args.camera_param).context("加载相机参数失败")?;
    let pattern = PatternTemplate::load(&args.pattern).context("加载标记图案失败")?;
    let model = load_anchored_model(&args.model, args.object_size, args.model_y_up)
        .context("加载模型失败")?;

    if args.marker_width <= 0.0 {
        bail!("标记边长必须为正数: {}", args.marker_width);
    }

    let source = open_source(&args.source, (args.width, args.height))
        .with_context(|| format!("打开视频源失败: {}", args.source))?;
    let param = param.fit_to(source.frame_size());
    param.print_summary();

    let estimator = SquarePoseEstimator::new(param.clone()).context("相机内参无效")?;
    let detector = SquareMarkerDetector::new(vec![pattern], args.border);

    let settings = SessionSettings {
        marker_width: args.marker_width,
        target_id: DEFAULT_TARGET_ID,
        snapshot_dir: args.snapshot_dir.clone(),
        border: args.border,
        object_half_height: model.half_height(),
    };
    let session = ArSession::new(
        config,
        &param,
        source,
        Box::new(detector),
        Box::new(estimator),
        settings,
    )?;

    Ok((session, MacroquadRenderer::new(model)))
}

#[macroquad::main(window_conf)]
async fn main() {
    let args = Args::parse();
    logging::init(args.debug_log);

    let (mut session, mut renderer) = match setup(&args) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("❌ 启动失败: {:#}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("✅ 启动完成, 按 ? 显示帮助");

    let start = Instant::now();
    let exit_code = loop {
        // 按键 (Esc 不一定产生字符事件)
        let mut quit = false;
        let escape = is_key_pressed(KeyCode::Escape).then_some('\u{1b}');
        for key in escape.into_iter().chain(std::iter::from_fn(get_char_pressed)) {
            if let Some(command) = command_for_key(key) {
                if session.handle_command(command) == Control::Quit {
                    quit = true;
                    break;
                }
            }
        }
        if quit {
            break 0;
        }

        if let Err(e) = session.tick(start.elapsed()) {
            tracing::error!("❌ {}", e);
            break 1;
        }

        let window = (screen_width() as u32, screen_height() as u32);
        let plan = session.render_plan(window, &MacroquadMetrics);
        renderer.draw(plan);

        next_frame().await;
    };

    session.shutdown();
    drop(renderer);
    std::process::exit(exit_code);
}
