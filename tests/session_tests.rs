use image::{GrayImage, RgbaImage};
use simplear_rs::detection::{Detection, MarkerCandidate, MarkerDetector, MarkerGeometry};
use simplear_rs::input::{Frame, FrameSource, PixelFormat};
use simplear_rs::pose::{Pose, PoseEstimate, PoseEstimator};
use simplear_rs::renderer::{Background, TextMetrics};
use simplear_rs::ui_config::DrawMode;
use simplear_rs::{
    ArConfig, ArError, ArSession, CameraParam, Command, Result, SessionSettings, TickOutcome,
};
use nalgebra::{Matrix3, Vector3};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

const W: u32 = 32;
const H: u32 = 24;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// 总有帧可取的视频源 (可临时断流)
struct TestSource {
    available: Rc<Cell<bool>>,
    next_id: u64,
}

impl FrameSource for TestSource {
    fn name(&self) -> &str {
        "test-source"
    }

    fn frame_size(&self) -> (u32, u32) {
        (W, H)
    }

    fn pixel_format(&self) -> Option<PixelFormat> {
        Some(PixelFormat::Rgba)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if !self.available.get() {
            return None;
        }
        self.next_id += 1;
        let img = RgbaImage::from_pixel(W, H, image::Rgba([90, 120, 150, 255]));
        Some(Frame::from_image(img, self.next_id))
    }

    fn close(&mut self) {}
}

/// 按脚本逐次返回检测结果; 脚本用完后返回空结果
struct ScriptedDetector {
    script: Rc<RefCell<VecDeque<Detection>>>,
    calls: Rc<Cell<u32>>,
}

impl MarkerDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame, _config: &ArConfig) -> Result<Detection> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.script.borrow_mut().pop_front().unwrap_or_default())
    }
}

/// 返回固定位姿; `fail` 为真时返回错误
struct CountingEstimator {
    calls: Rc<Cell<u32>>,
    fail: Rc<Cell<bool>>,
}

impl PoseEstimator for CountingEstimator {
    fn estimate(&mut self, geometry: &MarkerGeometry, _width: f64) -> Result<PoseEstimate> {
        self.calls.set(self.calls.get() + 1);
        if self.fail.get() {
            return Err(ArError::PoseEstimation("退化".to_string()));
        }
        // 平移取自标记中心, 便于区分不同帧的位姿
        let t = Vector3::new(geometry.center.0, geometry.center.1, 500.0);
        Ok(PoseEstimate {
            pose: Pose::from_parts(&Matrix3::identity(), &t),
            residual: 0.1,
        })
    }
}

struct Mono;

impl TextMetrics for Mono {
    fn text_width(&self, text: &str) -> f32 {
        text.len() as f32 * 6.0
    }
}

struct Harness {
    session: ArSession,
    available: Rc<Cell<bool>>,
    script: Rc<RefCell<VecDeque<Detection>>>,
    detect_calls: Rc<Cell<u32>>,
    estimate_calls: Rc<Cell<u32>>,
    estimate_fail: Rc<Cell<bool>>,
}

fn camera_param() -> CameraParam {
    CameraParam {
        xsize: W,
        ysize: H,
        mat: [
            [30.0, 0.0, 16.0, 0.0],
            [0.0, 30.0, 12.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
        dist_factor: [16.0, 12.0, 0.0, 1.0],
    }
}

fn harness_with(config: ArConfig, settings: SessionSettings) -> Harness {
    let available = Rc::new(Cell::new(true));
    let script = Rc::new(RefCell::new(VecDeque::new()));
    let detect_calls = Rc::new(Cell::new(0));
    let estimate_calls = Rc::new(Cell::new(0));
    let estimate_fail = Rc::new(Cell::new(false));

    let session = ArSession::new(
        config,
        &camera_param(),
        Box::new(TestSource {
            available: available.clone(),
            next_id: 0,
        }),
        Box::new(ScriptedDetector {
            script: script.clone(),
            calls: detect_calls.clone(),
        }),
        Box::new(CountingEstimator {
            calls: estimate_calls.clone(),
            fail: estimate_fail.clone(),
        }),
        settings,
    )
    .unwrap();

    Harness {
        session,
        available,
        script,
        detect_calls,
        estimate_calls,
        estimate_fail,
    }
}

fn harness() -> Harness {
    harness_with(ArConfig::default(), SessionSettings::default())
}

fn candidate(id: i32, confidence: f64, x: f64) -> MarkerCandidate {
    MarkerCandidate {
        id,
        confidence,
        geometry: MarkerGeometry::from_vertices([
            (x, 2.0),
            (x + 8.0, 2.0),
            (x + 8.0, 10.0),
            (x, 10.0),
        ]),
    }
}

fn detection(candidates: Vec<MarkerCandidate>) -> Detection {
    Detection {
        candidates,
        threshold: Some(100),
        debug_image: None,
    }
}

#[test]
fn ticks_inside_min_interval_do_nothing() {
    let mut h = harness();

    assert_eq!(h.session.tick(ms(5)).unwrap(), TickOutcome::Throttled);
    assert_eq!(h.detect_calls.get(), 0);
    assert_eq!(h.session.animator().angle_deg(), 0.0);

    assert!(matches!(
        h.session.tick(ms(10)).unwrap(),
        TickOutcome::Detected { .. }
    ));
    assert_eq!(h.detect_calls.get(), 1);

    // 距上次 tick 只有 9ms
    assert_eq!(h.session.tick(ms(19)).unwrap(), TickOutcome::Throttled);
    assert_eq!(h.detect_calls.get(), 1);
}

#[test]
fn animation_advances_even_without_frame() {
    let mut h = harness();
    h.available.set(false);

    assert_eq!(h.session.tick(ms(1000)).unwrap(), TickOutcome::NoFrame);
    assert!((h.session.animator().angle_deg() - 45.0).abs() < 1e-3);
    assert_eq!(h.detect_calls.get(), 0);
}

#[test]
fn rotation_disabled_keeps_angle() {
    let mut h = harness();
    h.session.handle_command(Command::ToggleRotation);
    assert!(!h.session.config().rotate);

    h.session.tick(ms(2000)).unwrap();
    assert_eq!(h.session.animator().angle_deg(), 0.0);
}

#[test]
fn found_then_lost_never_draws_previous_pose() {
    let mut h = harness();
    h.script
        .borrow_mut()
        .push_back(detection(vec![candidate(0, 0.8, 4.0)]));
    h.script.borrow_mut().push_back(detection(vec![]));

    assert_eq!(
        h.session.tick(ms(20)).unwrap(),
        TickOutcome::Detected { found: true }
    );
    assert!(h.session.is_found());
    let plan = h.session.render_plan((640, 480), &Mono);
    assert!(plan.view.is_some());
    assert!(plan.object_mvp().is_some());

    assert_eq!(
        h.session.tick(ms(40)).unwrap(),
        TickOutcome::Detected { found: false }
    );
    assert!(h.session.pose().is_none());
    let plan = h.session.render_plan((640, 480), &Mono);
    assert!(plan.view.is_none());
    assert!(plan.object_mvp().is_none());
    assert_eq!(h.estimate_calls.get(), 1);
}

#[test]
fn no_frame_tick_keeps_last_detection_result() {
    let mut h = harness();
    h.script
        .borrow_mut()
        .push_back(detection(vec![candidate(0, 0.8, 4.0)]));
    h.session.tick(ms(20)).unwrap();

    h.available.set(false);
    assert_eq!(h.session.tick(ms(40)).unwrap(), TickOutcome::NoFrame);
    assert!(h.session.is_found());
}

#[test]
fn estimator_only_called_for_target_pattern() {
    let mut h = harness();
    h.script.borrow_mut().push_back(detection(vec![
        candidate(-1, 0.9, 0.0),
        candidate(1, 0.95, 10.0),
    ]));

    assert_eq!(
        h.session.tick(ms(20)).unwrap(),
        TickOutcome::Detected { found: false }
    );
    assert_eq!(h.estimate_calls.get(), 0);
}

#[test]
fn best_candidate_is_the_one_estimated() {
    let mut h = harness();
    h.script.borrow_mut().push_back(detection(vec![
        candidate(0, 0.6, 0.0),
        candidate(0, 0.9, 20.0),
        candidate(0, 0.9, 12.0),
    ]));

    h.session.tick(ms(20)).unwrap();
    let pose = h.session.pose().unwrap();
    // 并列时保留先出现的候选 (x=20, 中心 24)
    assert_eq!(pose.translation().x, 24.0);
}

#[test]
fn estimator_failure_means_not_found() {
    let mut h = harness();
    h.estimate_fail.set(true);
    h.script
        .borrow_mut()
        .push_back(detection(vec![candidate(0, 0.8, 4.0)]));

    assert_eq!(
        h.session.tick(ms(20)).unwrap(),
        TickOutcome::Detected { found: false }
    );
    assert_eq!(h.estimate_calls.get(), 1);
}

#[test]
fn snapshot_requests_are_debounced() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings {
        snapshot_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut h = harness_with(ArConfig::default(), settings);

    h.session.handle_command(Command::RequestSnapshot);
    h.session.handle_command(Command::RequestSnapshot);
    assert!(h.session.snapshot_pending());

    h.session.tick(ms(20)).unwrap();
    h.session.tick(ms(40)).unwrap();

    assert!(!h.session.snapshot_pending());
    assert!(dir.path().join("image-0000.jpg").exists());
    assert!(!dir.path().join("image-0001.jpg").exists());

    // 新的请求使用下一个编号
    h.session.handle_command(Command::RequestSnapshot);
    h.session.tick(ms(60)).unwrap();
    assert!(dir.path().join("image-0001.jpg").exists());
    assert_eq!(h.session.snapshot_count(), 2);
}

#[test]
fn background_frame_is_drawn_at_most_once() {
    let mut h = harness();
    h.session.tick(ms(20)).unwrap();

    let first = h.session.render_plan((640, 480), &Mono);
    assert!(matches!(first.background, Some(Background::Video(_))));

    let second = h.session.render_plan((640, 480), &Mono);
    assert!(second.background.is_none());
}

#[test]
fn debug_mode_shows_binarised_image() {
    let config = ArConfig {
        debug: true,
        ..Default::default()
    };
    let mut h = harness_with(config, SessionSettings::default());
    h.script.borrow_mut().push_back(Detection {
        candidates: vec![],
        threshold: Some(100),
        debug_image: Some(GrayImage::new(W, H)),
    });

    h.session.tick(ms(20)).unwrap();
    let plan = h.session.render_plan((640, 480), &Mono);
    assert!(matches!(plan.background, Some(Background::Debug(_))));
}

#[test]
fn draw_mode_cycles_through_three_states() {
    let mut h = harness();
    assert_eq!(h.session.config().draw_mode, DrawMode::TextureFull);
    h.session.handle_command(Command::CycleDrawMode);
    assert_eq!(h.session.config().draw_mode, DrawMode::TextureHalf);
    h.session.handle_command(Command::CycleDrawMode);
    assert_eq!(h.session.config().draw_mode, DrawMode::PixelBlit);
    h.session.handle_command(Command::CycleDrawMode);
    assert_eq!(h.session.config().draw_mode, DrawMode::TextureFull);

    let plan = h.session.render_plan((640, 480), &Mono);
    assert_eq!(plan.draw_mode, DrawMode::TextureFull);
}

#[test]
fn hud_reports_detector_threshold() {
    let mut h = harness();
    h.script.borrow_mut().push_back(Detection {
        candidates: vec![],
        threshold: Some(77),
        debug_image: None,
    });
    h.session.tick(ms(20)).unwrap();

    let plan = h.session.render_plan((640, 480), &Mono);
    let mode_info = &plan.hud[0];
    assert_eq!(mode_info.lines[1].text, "Threshold mode: MANUAL, thresh=77");
    assert_eq!(mode_info.lines[0].text, "Processing 32x24 video frames full frame");
}
