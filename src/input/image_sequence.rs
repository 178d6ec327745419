//! 图片序列输入 - 循环播放单张图片或目录中的图片, 模拟固定帧率的视频源

use super::{Frame, FrameSource, PixelFormat};
use crate::error::{ArError, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "ppm"];

/// 图片序列视频源
pub struct ImageSequenceSource {
    name: String,
    images: Vec<RgbaImage>,
    frame_interval: Duration,
    last_emit: Option<Instant>,
    cursor: usize,
    frame_id: u64,
    size: (u32, u32),
    closed: bool,
}

impl ImageSequenceSource {
    /// 打开图片文件或图片目录 (按文件名排序)
    pub fn open(path: &Path, frame_interval: Duration) -> Result<Self> {
        let open_error = |reason: String| ArError::SourceOpen {
            source_name: path.display().to_string(),
            reason,
        };

        let files: Vec<PathBuf> = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| open_error(e.to_string()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut images = Vec::with_capacity(files.len());
        for file in &files {
            let img = image::open(file)
                .map_err(|e| open_error(format!("{}: {}", file.display(), e)))?;
            images.push(img.to_rgba8());
        }

        let source = Self::from_images(path.display().to_string(), images, frame_interval)?;
        tracing::info!(
            "🎬 图片序列已打开: {} ({} 帧, {}x{})",
            source.name,
            source.images.len(),
            source.size.0,
            source.size.1
        );
        Ok(source)
    }

    /// 由内存中的图片构造 (所有图片必须同尺寸)
    pub fn from_images(
        name: String,
        images: Vec<RgbaImage>,
        frame_interval: Duration,
    ) -> Result<Self> {
        let first = images.first().ok_or_else(|| ArError::SourceOpen {
            source_name: name.clone(),
            reason: "没有可用的图片".to_string(),
        })?;
        let size = first.dimensions();

        if let Some(bad) = images.iter().find(|img| img.dimensions() != size) {
            return Err(ArError::SourceOpen {
                source_name: name,
                reason: format!(
                    "图片尺寸不一致: {}x{} != {}x{}",
                    bad.width(),
                    bad.height(),
                    size.0,
                    size.1
                ),
            });
        }

        Ok(Self {
            name,
            images,
            frame_interval,
            last_emit: None,
            cursor: 0,
            frame_id: 0,
            size,
            closed: false,
        })
    }
}

impl FrameSource for ImageSequenceSource {
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
        if self.closed {
            return None;
        }

        // 按帧间隔出帧, 模拟摄像头帧率
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.frame_interval {
                return None;
            }
        }
        self.last_emit = Some(now);

        let image = self.images[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.images.len();
        self.frame_id += 1;
        Some(Frame::from_image(image, self.frame_id))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            tracing::info!("📹 图片序列已关闭: {}", self.name);
        }
    }
}
