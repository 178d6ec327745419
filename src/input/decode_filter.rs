/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use super::Frame;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// FFmpeg解码过滤器: 摄像头 YUV420P → RGBA帧 → 跟踪线程
#[derive(Clone)]
pub struct DecodeFilter {
    pub count: usize,
    pub last: Instant,
    pub current_fps: f64,
    pub dropped_frames: usize, // 丢弃的帧数
    pub total_frames: usize,   // 总帧数
    frame_id: u64,
    tx: Sender<Frame>,
    // 用于队列满时丢弃最旧帧
    rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
}

impl DecodeFilter {
    pub fn new(tx: Sender<Frame>, rx: Receiver<Frame>, stop: Arc<AtomicBool>) -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
            total_frames: 0,
            frame_id: 0,
            tx,
            rx,
            stop,
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        // 视频源已关闭则停止解码
        if self.stop.load(Ordering::Relaxed) {
            return Err("Camera closed".to_string());
        }

        unsafe {
            self.total_frames += 1;

            // 基本检查：空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as u32;
            let h = (*frame.as_ptr()).height as u32;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.dropped_frames += 1;
                tracing::debug!("⚠️ 丢弃帧 #{}: 非法分辨率 {}x{}", self.total_frames, w, h);
                return Ok(None);
            }

            // YUV420P数据指针
            let y_plane = (*frame.as_ptr()).data[0];
            let u_plane = (*frame.as_ptr()).data[1];
            let v_plane = (*frame.as_ptr()).data[2];
            let y_stride = (*frame.as_ptr()).linesize[0] as usize;
            let uv_stride = (*frame.as_ptr()).linesize[1] as usize;

            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.dropped_frames += 1;
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize / 2) {
                self.dropped_frames += 1;
                return Ok(None);
            }

            self.count += 1;

            let mut buffer = vec![255u8; (w * h * 4) as usize];
            yuv420p_to_rgba(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut buffer,
                w as usize,
                h as usize,
            );

            if self.last.elapsed().as_secs_f64() >= 1.0 {
                let elapsed = self.last.elapsed().as_secs_f64();
                self.current_fps = self.count as f64 / elapsed;
                tracing::debug!(
                    "📺 解码统计: 实际{:.1}fps | 总帧{} | 丢弃{}",
                    self.current_fps,
                    self.total_frames,
                    self.dropped_frames
                );
                self.last = Instant::now();
                self.count = 0;
            }

            self.frame_id += 1;
            let frame_out = Frame::new(buffer, w, h, self.frame_id);
            match send_newest(&self.tx, &self.rx, frame_out) {
                Ok(dropped) => self.dropped_frames += dropped,
                Err(()) => return Err("Frame receiver dropped".to_string()),
            }

            Ok(Some(frame))
        }
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        tracing::info!("✅ 解码线程退出");
    }
}

/// 发送新帧; 队列已满时先丢弃最旧的一帧, 返回丢弃的帧数
fn send_newest<T>(tx: &Sender<T>, rx: &Receiver<T>, item: T) -> Result<usize, ()> {
    match tx.try_send(item) {
        Ok(()) => Ok(0),
        Err(TrySendError::Full(item)) => {
            // 跟踪线程未及时取帧, 丢弃最旧帧
            let evicted = usize::from(rx.try_recv().is_ok());
            match tx.try_send(item) {
                Ok(()) => Ok(evicted),
                Err(TrySendError::Full(_)) => Ok(evicted + 1),
                Err(TrySendError::Disconnected(_)) => Err(()),
            }
        }
        Err(TrySendError::Disconnected(_)) => Err(()),
    }
}

#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgba(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 4;
        }
    }
}
