//! 摄像头输入模块 - 独立的摄像头解码线程
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use super::decode_filter::DecodeFilter;
use super::{Frame, FrameSource, PixelFormat};
use crate::error::{ArError, Result};
use crossbeam_channel::Receiver;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 等待首帧的超时时间 (用于确定实际分辨率)
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// 摄像头视频源
pub struct CameraSource {
    name: String,
    rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    size: (u32, u32),
    pending: Option<Frame>,
}

impl CameraSource {
    /// 打开摄像头并等待首帧
    pub fn open(device_index: usize, video_size: (u32, u32)) -> Result<Self> {
        let name = format_camera_url(device_index);
        tracing::info!("🎥 打开摄像头: {}", name);

        let (tx, rx) = crossbeam_channel::bounded(2);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, rx.clone(), stop.clone());

        let input_name = name.clone();
        std::thread::spawn(move || {
            if let Err(e) = decode_camera(&input_name, video_size, filter) {
                tracing::error!("❌ 摄像头解码失败: {}", e);
            }
        });

        // 首帧决定实际输出尺寸
        let first = rx
            .recv_timeout(FIRST_FRAME_TIMEOUT)
            .map_err(|e| ArError::SourceOpen {
                source_name: name.clone(),
                reason: format!("等待首帧失败: {}", e),
            })?;
        let size = (first.width, first.height);
        tracing::info!("✅ 摄像头连接成功: {}x{}", size.0, size.1);

        Ok(Self {
            name,
            rx,
            stop,
            size,
            pending: Some(first),
        })
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn pixel_format(&self) -> Option<PixelFormat> {
        Some(PixelFormat::Rgba)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        // 只保留最新一帧
        let mut latest = self.pending.take();
        for frame in self.rx.try_iter() {
            latest = Some(frame);
        }
        latest.filter(|f| (f.width, f.height) == self.size)
    }

    fn close(&mut self) {
        if !self.stop.swap(true, Ordering::Relaxed) {
            tracing::info!("📹 摄像头已关闭: {}", self.name);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize) -> String {
    #[cfg(target_os = "linux")]
    {
        format!("/dev/video{}", index)
    }
    #[cfg(not(target_os = "linux"))]
    {
        format!("{}", index)
    }
}

/// 摄像头解码实现 (阻塞直至解码结束)
fn decode_camera(
    camera_input: &str,
    video_size: (u32, u32),
    filter: DecodeFilter,
) -> std::result::Result<(), String> {
    #[cfg(target_os = "windows")]
    let format = "dshow"; // DirectShow

    #[cfg(target_os = "macos")]
    let format = "avfoundation"; // AVFoundation

    #[cfg(target_os = "linux")]
    let format = "v4l2"; // Video4Linux2

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    let format = "video4linux2";

    tracing::info!("🔍 使用格式: {}, 输入: {}", format, camera_input);

    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let size = format!("{}x{}", video_size.0, video_size.1);
    let input = Input::new(camera_input)
        .set_format(format)
        .set_input_opts([("framerate", "30"), ("video_size", size.as_str())].into());

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))?;

    let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
    let _ = sch.wait();
    tracing::info!("📹 摄像头解码循环结束");
    Ok(())
}
