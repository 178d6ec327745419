/// 跟踪渲染循环 (Tracking-Render Loop)
///
/// `ArSession` 持有全部运行时状态 (配置/位姿/动画/视频源/检测器/估计器),
/// 由驱动程序在同一线程上调用三个入口:
/// - tick:           取帧 → 检测 → 选择 → 位姿估计
/// - render_plan:    生成本次绘制数据
/// - handle_command: 操作员按键命令
pub mod animator;

pub use animator::{ObjectAnimator, ROTATION_SPEED_DEG};

use crate::camera_param::CameraParam;
use crate::detection::{select_best, MarkerDetector, PatternId};
use crate::error::{ArError, Result};
use crate::input::{Frame, FrameSource, PixelFormat};
use crate::keys::{Command, Control};
use crate::pose::{Pose, PoseEstimator};
use crate::renderer::{
    build_hud, camera_view, object_transform, projection_matrix, Background, HudState,
    ScenePlan, TextMetrics, VIEW_DISTANCE_MAX, VIEW_DISTANCE_MIN, VIEW_SCALEFACTOR,
};
use crate::ui_config::ArConfig;
use image::GrayImage;
use nalgebra::Matrix4;
use std::path::PathBuf;
use std::time::Duration;

/// 最小 tick 间隔 (上限 100Hz)
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);
/// 快照 JPEG 质量
pub const SNAPSHOT_QUALITY: u8 = 75;
/// 跟踪目标: 第一个加载的图案
pub const DEFAULT_TARGET_ID: PatternId = 0;
/// 标记物理边长 (毫米)
pub const DEFAULT_MARKER_WIDTH: f64 = 80.0;
/// 标记边框占边长比例
pub const DEFAULT_BORDER: f64 = 0.25;

/// 启动时确定的会话参数
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub marker_width: f64,
    pub target_id: PatternId,
    pub snapshot_dir: PathBuf,
    /// 仅用于 HUD 显示
    pub border: f64,
    /// 物体半高, 用于将底面放到标记平面上
    pub object_half_height: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            marker_width: DEFAULT_MARKER_WIDTH,
            target_id: DEFAULT_TARGET_ID,
            snapshot_dir: PathBuf::from("."),
            border: DEFAULT_BORDER,
            object_half_height: DEFAULT_MARKER_WIDTH as f32 / 2.0,
        }
    }
}

/// 一次 tick 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// 距上次 tick 不足最小间隔, 什么也没做
    Throttled,
    /// 动画已推进, 但视频源暂无新帧
    NoFrame,
    /// 完成一次检测
    Detected { found: bool },
}

pub struct ArSession {
    config: ArConfig,
    settings: SessionSettings,
    projection: Matrix4<f64>,

    source: Box<dyn FrameSource>,
    detector: Box<dyn MarkerDetector>,
    estimator: Box<dyn PoseEstimator>,

    animator: ObjectAnimator,
    /// Some 即本轮找到标记
    pose: Option<Pose>,
    last_tick: Duration,

    // 待绘制内容
    pending_frame: Option<Frame>,
    debug_image: Option<GrayImage>,
    last_threshold: Option<u8>,
    // macroquad 每帧都会重绘, 此标记只表示有新的检测结果待绘制
    redraw_requested: bool,

    // 快照
    snapshot_pending: bool,
    snapshot_count: u32,

    // 检测帧率统计
    detect_count: u64,
    detect_timer_start: Duration,

    closed: bool,
}

impl ArSession {
    /// 创建会话; 视频源像素格式无效时返回错误
    pub fn new(
        config: ArConfig,
        camera_param: &CameraParam,
        source: Box<dyn FrameSource>,
        detector: Box<dyn MarkerDetector>,
        estimator: Box<dyn PoseEstimator>,
        settings: SessionSettings,
    ) -> Result<Self> {
        match source.pixel_format() {
            Some(PixelFormat::Rgba) => {}
            None => return Err(ArError::UnsupportedPixelFormat),
        }

        let (w, h) = source.frame_size();
        tracing::info!("🎬 视频源 {} 已就绪: {}x{}", source.name(), w, h);

        Ok(Self {
            config,
            projection: projection_matrix(camera_param, VIEW_DISTANCE_MIN, VIEW_DISTANCE_MAX),
            settings,
            source,
            detector,
            estimator,
            animator: ObjectAnimator::new(),
            pose: None,
            last_tick: Duration::ZERO,
            pending_frame: None,
            debug_image: None,
            last_threshold: None,
            redraw_requested: false,
            snapshot_pending: false,
            snapshot_count: 0,
            detect_count: 0,
            detect_timer_start: Duration::ZERO,
            closed: false,
        })
    }

    /// 跟踪循环的一次迭代
    ///
    /// `now` 为启动以来的单调时间. 检测器错误原样返回, 由调用方终止程序.
    pub fn tick(&mut self, now: Duration) -> Result<TickOutcome> {
        let elapsed = now.saturating_sub(self.last_tick);
        if elapsed < MIN_TICK_INTERVAL {
            return Ok(TickOutcome::Throttled);
        }
        self.last_tick = now;

        self.animator
            .advance(elapsed.as_secs_f32(), self.config.rotate);

        let Some(frame) = self.source.next_frame() else {
            return Ok(TickOutcome::NoFrame);
        };

        if self.snapshot_pending {
            self.save_snapshot(&frame);
        }

        self.detect_count += 1;
        let detection = self.detector.detect(&frame, &self.config)?;

        self.pose = match select_best(&detection.candidates, self.settings.target_id) {
            Some(candidate) => {
                match self
                    .estimator
                    .estimate(&candidate.geometry, self.settings.marker_width)
                {
                    Ok(estimate) => {
                        tracing::trace!("🎯 位姿残差 {:.3}px", estimate.residual);
                        Some(estimate.pose)
                    }
                    Err(e) => {
                        tracing::debug!("位姿估计失败: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        self.pending_frame = Some(frame);
        self.debug_image = detection.debug_image;
        self.last_threshold = detection.threshold;
        self.redraw_requested = true;

        Ok(TickOutcome::Detected {
            found: self.pose.is_some(),
        })
    }

    /// 保存快照; 计数器每次尝试都递增, 失败只记录日志
    fn save_snapshot(&mut self, frame: &Frame) {
        let path = self
            .settings
            .snapshot_dir
            .join(format!("image-{:04}.jpg", self.snapshot_count));
        self.snapshot_count += 1;
        self.snapshot_pending = false;

        match self.source.save_frame(frame, &path, SNAPSHOT_QUALITY) {
            Ok(()) => tracing::info!("📸 快照已保存: {}", path.display()),
            Err(e) => tracing::error!("❌ {}", e),
        }
    }

    /// 生成本次绘制数据; 待绘制的帧被取走, 同一帧最多上传一次
    pub fn render_plan(&mut self, window: (u32, u32), metrics: &dyn TextMetrics) -> ScenePlan {
        self.redraw_requested = false;

        let frame = self.pending_frame.take();
        let debug_image = self.debug_image.take();
        let background = match (frame, debug_image) {
            (Some(_), Some(gray)) if self.config.debug => Some(Background::Debug(gray)),
            (Some(frame), _) => Some(Background::Video(frame)),
            (None, _) => None,
        };

        let hud = build_hud(
            &HudState {
                config: &self.config,
                frame_size: self.source.frame_size(),
                threshold: self.last_threshold,
                border: self.settings.border,
                window,
            },
            metrics,
        );

        ScenePlan {
            background,
            draw_mode: self.config.draw_mode,
            projection: self.projection,
            view: self
                .pose
                .as_ref()
                .map(|pose| camera_view(pose, VIEW_SCALEFACTOR)),
            object: object_transform(
                self.animator.angle_deg(),
                self.settings.object_half_height,
            ),
            hud,
        }
    }

    /// 处理一条操作员命令
    pub fn handle_command(&mut self, command: Command) -> Control {
        match command {
            Command::Quit => {
                tracing::info!("👋 收到退出命令");
                return Control::Quit;
            }
            Command::RequestSnapshot => {
                if self.snapshot_pending {
                    tracing::debug!("快照请求已在等待中");
                } else {
                    self.snapshot_pending = true;
                }
            }
            Command::CycleDrawMode => {
                self.report_detection_rate();
                self.config.apply(command);
                tracing::info!("🖼️  绘制模式: {}", self.config.draw_mode.label());
            }
            Command::ThresholdDown | Command::ThresholdUp => {
                self.config.apply(command);
                tracing::info!("🔧 阈值: {}", self.config.threshold);
            }
            Command::CycleThresholdMode => {
                self.config.apply(command);
                tracing::info!("🔧 阈值模式: {}", self.config.threshold_mode.label());
            }
            Command::ToggleImageProcMode => {
                self.config.apply(command);
                tracing::info!("🔧 图像处理: {}", self.config.image_proc_mode.label());
            }
            Command::CyclePatternDetectionMode => {
                self.config.apply(command);
                tracing::info!(
                    "🔧 图案识别: {}",
                    self.config.pattern_detection_mode.label()
                );
            }
            _ => self.config.apply(command),
        }
        Control::Continue
    }

    /// 输出检测帧率并重新计数
    fn report_detection_rate(&mut self) {
        let secs = self
            .last_tick
            .saturating_sub(self.detect_timer_start)
            .as_secs_f64();
        if secs > 0.0 {
            tracing::info!(
                "📊 检测帧率 = {:.1} fps ({} 帧 / {:.1}s)",
                self.detect_count as f64 / secs,
                self.detect_count,
                secs
            );
        }
        self.detect_count = 0;
        self.detect_timer_start = self.last_tick;
    }

    /// 关闭视频源 (可重复调用)
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.source.close();
        self.pending_frame = None;
        self.pose = None;
        tracing::info!("🛑 视频源 {} 已关闭", self.source.name());
    }

    pub fn config(&self) -> &ArConfig {
        &self.config
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn pose(&self) -> Option<&Pose> {
        self.pose.as_ref()
    }

    pub fn is_found(&self) -> bool {
        self.pose.is_some()
    }

    pub fn animator(&self) -> &ObjectAnimator {
        &self.animator
    }

    pub fn snapshot_pending(&self) -> bool {
        self.snapshot_pending
    }

    /// 已尝试保存的快照数
    pub fn snapshot_count(&self) -> u32 {
        self.snapshot_count
    }

    /// 上次帧率输出以来的检测次数
    pub fn detect_count(&self) -> u64 {
        self.detect_count
    }
}

impl Drop for ArSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, MarkerCandidate, MarkerGeometry};
    use crate::pose::PoseEstimate;
    use nalgebra::{Matrix3, Vector3};
    use std::cell::Cell;
    use std::path::Path;
    use std::rc::Rc;

    struct OneFrame {
        frames_left: usize,
        closed: Rc<Cell<u32>>,
        format: Option<PixelFormat>,
    }

    impl FrameSource for OneFrame {
        fn name(&self) -> &str {
            "test"
        }
        fn frame_size(&self) -> (u32, u32) {
            (4, 4)
        }
        fn pixel_format(&self) -> Option<PixelFormat> {
            self.format
        }
        fn next_frame(&mut self) -> Option<Frame> {
            if self.frames_left == 0 {
                return None;
            }
            self.frames_left -= 1;
            Some(Frame::new(vec![0; 64], 4, 4, 0))
        }
        fn save_frame(&self, _frame: &Frame, _path: &Path, _quality: u8) -> Result<()> {
            Err(ArError::Snapshot {
                path: PathBuf::from("x"),
                reason: "只读".to_string(),
            })
        }
        fn close(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    struct Always(bool);

    impl MarkerDetector for Always {
        fn detect(&mut self, _frame: &Frame, _config: &ArConfig) -> Result<Detection> {
            if !self.0 {
                return Err(ArError::Detection("设备故障".to_string()));
            }
            Ok(Detection {
                candidates: vec![MarkerCandidate {
                    id: 0,
                    confidence: 0.9,
                    geometry: MarkerGeometry::from_vertices([
                        (0.0, 0.0),
                        (1.0, 0.0),
                        (1.0, 1.0),
                        (0.0, 1.0),
                    ]),
                }],
                threshold: Some(100),
                debug_image: None,
            })
        }
    }

    struct Fixed;

    impl PoseEstimator for Fixed {
        fn estimate(&mut self, _g: &MarkerGeometry, _w: f64) -> Result<PoseEstimate> {
            Ok(PoseEstimate {
                pose: Pose::from_parts(&Matrix3::identity(), &Vector3::new(0.0, 0.0, 500.0)),
                residual: 0.0,
            })
        }
    }

    struct Mono;

    impl TextMetrics for Mono {
        fn text_width(&self, text: &str) -> f32 {
            text.len() as f32 * 6.0
        }
    }

    fn param() -> CameraParam {
        CameraParam {
            xsize: 4,
            ysize: 4,
            mat: [[4.0, 0.0, 2.0, 0.0], [0.0, 4.0, 2.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
            dist_factor: [2.0, 2.0, 0.0, 1.0],
        }
    }

    fn session(frames: usize, detector_ok: bool, closed: Rc<Cell<u32>>) -> ArSession {
        ArSession::new(
            ArConfig::default(),
            &param(),
            Box::new(OneFrame {
                frames_left: frames,
                closed,
                format: Some(PixelFormat::Rgba),
            }),
            Box::new(Always(detector_ok)),
            Box::new(Fixed),
            SessionSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_pixel_format_rejected() {
        let result = ArSession::new(
            ArConfig::default(),
            &param(),
            Box::new(OneFrame {
                frames_left: 1,
                closed: Rc::default(),
                format: None,
            }),
            Box::new(Always(true)),
            Box::new(Fixed),
            SessionSettings::default(),
        );
        assert!(matches!(result, Err(ArError::UnsupportedPixelFormat)));
    }

    #[test]
    fn test_detector_error_propagates() {
        let mut s = session(1, false, Rc::default());
        let err = s.tick(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ArError::Detection(_)));
    }

    #[test]
    fn test_snapshot_failure_is_not_fatal() {
        let mut s = session(1, true, Rc::default());
        s.handle_command(Command::RequestSnapshot);
        let outcome = s.tick(Duration::from_millis(20)).unwrap();
        assert_eq!(outcome, TickOutcome::Detected { found: true });
        assert!(!s.snapshot_pending());
        assert_eq!(s.snapshot_count(), 1);
    }

    #[test]
    fn test_shutdown_closes_source_once() {
        let closed = Rc::new(Cell::new(0));
        let mut s = session(1, true, closed.clone());
        s.shutdown();
        s.shutdown();
        drop(s);
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn test_cycle_draw_mode_resets_rate_counter() {
        let mut s = session(2, true, Rc::default());
        s.tick(Duration::from_millis(20)).unwrap();
        s.tick(Duration::from_millis(40)).unwrap();
        assert_eq!(s.detect_count(), 2);
        assert_eq!(s.handle_command(Command::CycleDrawMode), Control::Continue);
        assert_eq!(s.detect_count(), 0);
    }

    #[test]
    fn test_detection_pass_requests_redraw() {
        let mut s = session(1, true, Rc::default());
        assert!(!s.redraw_requested);
        s.tick(Duration::from_millis(20)).unwrap();
        assert!(s.redraw_requested);

        s.render_plan((64, 48), &Mono);
        assert!(!s.redraw_requested);

        // 无帧的 tick 不请求重绘
        assert_eq!(s.tick(Duration::from_millis(40)).unwrap(), TickOutcome::NoFrame);
        assert!(!s.redraw_requested);
    }

    #[test]
    fn test_quit_command() {
        let mut s = session(0, true, Rc::default());
        assert_eq!(s.handle_command(Command::Quit), Control::Quit);
    }
}
