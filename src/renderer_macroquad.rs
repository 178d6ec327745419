//! macroquad 渲染后端
//!
//! 按 `ScenePlan` 依次绘制: 背景视频 → 锚定物体 (3D, 深度测试) → HUD (2D).

use crate::models::{ObjModel, Triangle};
use crate::renderer::hud::CHAR_HEIGHT;
use crate::renderer::{Background, HudBlock, ScenePlan, TextMetrics};
use crate::ui_config::DrawMode;
use image::GrayImage;
use macroquad::texture::RenderPass;
use macroquad::prelude::*;
use nalgebra::{Matrix3, Matrix4, Vector3};
use std::sync::Arc;
use std::time::Instant;

/// HUD 字号
pub const HUD_FONT_SIZE: u16 = 14;
/// 每个网格的最大顶点数 (u16 索引)
const MAX_MESH_VERTICES: usize = u16::MAX as usize;
const AMBIENT: f32 = 0.2;
const DIFFUSE: f32 = 0.8;

/// 使用 macroquad 默认字体测量文字宽度
pub struct MacroquadMetrics;

impl TextMetrics for MacroquadMetrics {
    fn text_width(&self, text: &str) -> f32 {
        measure_text(text, None, HUD_FONT_SIZE, 1.0).width
    }
}

/// 直接使用 模型-视图-投影 矩阵的相机
struct MatrixCamera {
    matrix: Mat4,
}

impl Camera for MatrixCamera {
    fn matrix(&self) -> Mat4 {
        self.matrix
    }

    fn depth_enabled(&self) -> bool {
        true
    }

    fn render_pass(&self) -> Option<RenderPass> {
        None
    }

    fn viewport(&self) -> Option<(i32, i32, i32, i32)> {
        None
    }
}

/// 背景纹理的上传方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextureKind {
    /// 每帧新建, 最近邻采样
    Blit,
    /// 持久纹理, 原地更新
    Full,
    /// 只含偶数行, 绘制时拉伸
    HalfField,
}

pub struct MacroquadRenderer {
    model: ObjModel,
    background: Option<(Texture2D, TextureKind)>,

    // 渲染帧率统计
    render_count: u64,
    render_last: Instant,
    render_fps: f64,
}

impl MacroquadRenderer {
    pub fn new(model: ObjModel) -> Self {
        Self {
            model,
            background: None,
            render_count: 0,
            render_last: Instant::now(),
            render_fps: 0.0,
        }
    }

    pub fn render_fps(&self) -> f64 {
        self.render_fps
    }

    /// 绘制一帧
    pub fn draw(&mut self, mut plan: ScenePlan) {
        clear_background(BLACK);

        if let Some(background) = plan.background.take() {
            self.upload_background(background, plan.draw_mode);
        }

        // 绘制视频帧 (拉伸到整个窗口)
        set_default_camera();
        if let Some((texture, _)) = &self.background {
            draw_texture_ex(
                texture,
                0.0,
                0.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(screen_width(), screen_height())),
                    ..Default::default()
                },
            );
        }

        // 未找到标记时不绘制物体
        if let (Some(view), Some(mvp)) = (plan.view, plan.object_mvp()) {
            let model_view = view * plan.object;
            let rotation: Matrix3<f64> = model_view.fixed_view::<3, 3>(0, 0).into_owned();
            set_camera(&MatrixCamera {
                matrix: to_mat4(&mvp),
            });
            self.draw_model(&rotation);
            set_default_camera();
        }

        for block in &plan.hud {
            draw_hud_block(block);
        }

        // FPS统计
        self.render_count += 1;
        let now = Instant::now();
        if now.duration_since(self.render_last).as_secs() >= 1 {
            self.render_fps =
                self.render_count as f64 / now.duration_since(self.render_last).as_secs_f64();
            self.render_count = 0;
            self.render_last = now;
            tracing::debug!("🎨 渲染帧率 {:.1} fps", self.render_fps);
        }
    }

    /// 按绘制模式上传背景
    fn upload_background(&mut self, background: Background, draw_mode: DrawMode) {
        let (bytes, width, height) = match background {
            Background::Video(frame) => {
                let bytes = Arc::try_unwrap(frame.rgba_data).unwrap_or_else(|arc| arc.to_vec());
                (bytes, frame.width, frame.height)
            }
            Background::Debug(gray) => {
                let (w, h) = gray.dimensions();
                (gray_to_rgba(&gray), w, h)
            }
        };
        if width == 0 || height == 0 || bytes.len() != (width * height * 4) as usize {
            tracing::warn!("⚠️ 背景帧尺寸无效: {}x{}", width, height);
            return;
        }

        match draw_mode {
            DrawMode::PixelBlit => {
                let texture = Texture2D::from_rgba8(width as u16, height as u16, &bytes);
                texture.set_filter(FilterMode::Nearest);
                self.background = Some((texture, TextureKind::Blit));
            }
            DrawMode::TextureFull => self.update_texture(bytes, width, height, TextureKind::Full),
            DrawMode::TextureHalf => {
                let (even, half_height) = even_rows(&bytes, width, height);
                self.update_texture(even, width, half_height, TextureKind::HalfField)
            }
        }
    }

    /// 只在尺寸或方式变化时重建纹理, 否则更新像素数据
    fn update_texture(&mut self, bytes: Vec<u8>, width: u32, height: u32, kind: TextureKind) {
        let needs_rebuild = match &self.background {
            Some((tex, current)) => {
                *current != kind || tex.width() != width as f32 || tex.height() != height as f32
            }
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width as u16, height as u16, &bytes);
            texture.set_filter(FilterMode::Linear);
            self.background = Some((texture, kind));
        } else if let Some((tex, _)) = &self.background {
            tex.update(&Image {
                bytes,
                width: width as u16,
                height: height as u16,
            });
        }
    }

    /// 按块绘制模型 (u16 索引上限)
    fn draw_model(&self, rotation: &Matrix3<f64>) {
        for chunk in self.model.triangles.chunks(MAX_MESH_VERTICES / 3) {
            let mut vertices = Vec::with_capacity(chunk.len() * 3);
            for tri in chunk {
                push_lit_triangle(&mut vertices, tri, rotation);
            }
            let indices = (0..vertices.len() as u16).collect();
            draw_mesh(&Mesh {
                vertices,
                indices,
                texture: None,
            });
        }
    }
}

/// Lambert 光照, 光源位于观察者处 (视图空间 +Z)
fn lambert(normal: &[f32; 3], rotation: &Matrix3<f64>) -> f32 {
    let n = rotation * Vector3::new(normal[0] as f64, normal[1] as f64, normal[2] as f64);
    let len = n.norm();
    let facing = if len > 0.0 { (n.z / len).max(0.0) } else { 0.0 };
    AMBIENT + DIFFUSE * facing as f32
}

fn push_lit_triangle(out: &mut Vec<Vertex>, tri: &Triangle, rotation: &Matrix3<f64>) {
    for (p, n) in tri.positions.iter().zip(tri.normals.iter()) {
        let shade = lambert(n, rotation);
        let color = Color::new(
            tri.color[0] * shade,
            tri.color[1] * shade,
            tri.color[2] * shade,
            1.0,
        );
        out.push(Vertex::new(p[0], p[1], p[2], 0.0, 0.0, color));
    }
}

fn draw_hud_block(block: &HudBlock) {
    let r = &block.backing;
    draw_rectangle(r.x, r.y, r.w, r.h, Color::new(0.0, 0.0, 0.0, 0.5));
    for line in &block.lines {
        // draw_text 的 y 为基线
        draw_text(
            &line.text,
            line.x,
            line.y + CHAR_HEIGHT,
            HUD_FONT_SIZE as f32,
            WHITE,
        );
    }
}

/// nalgebra (列优先) → glam
fn to_mat4(m: &Matrix4<f64>) -> Mat4 {
    let mut cols = [0.0f32; 16];
    for (dst, src) in cols.iter_mut().zip(m.as_slice()) {
        *dst = *src as f32;
    }
    Mat4::from_cols_array(&cols)
}

fn gray_to_rgba(gray: &GrayImage) -> Vec<u8> {
    gray.as_raw().iter().flat_map(|&v| [v, v, v, 255]).collect()
}

/// 抽取偶数行 (第 0, 2, 4... 行), 返回像素与新高度
fn even_rows(rgba: &[u8], width: u32, height: u32) -> (Vec<u8>, u32) {
    let stride = width as usize * 4;
    let bytes: Vec<u8> = rgba
        .chunks_exact(stride)
        .take(height as usize)
        .step_by(2)
        .flatten()
        .copied()
        .collect();
    let rows = (bytes.len() / stride.max(1)) as u32;
    (bytes, rows)
}
