/// 视频输入系统 (Video Input System)
///
/// 跟踪循环每个tick轮询一次视频源, 每次成功轮询移交一帧的所有权.
/// - ImageSequenceSource: 图片/图片目录循环播放 (始终可用)
/// - CameraSource:        本地摄像头 (FFmpeg, `camera` 特性)
pub mod image_sequence;

#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub mod decode_filter;

pub use image_sequence::ImageSequenceSource;

#[cfg(feature = "camera")]
pub use camera::CameraSource;

use crate::error::{ArError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

/// 视频源输出的像素格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
}

/// 已解码帧
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba_data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
    pub frame_id: u64, // 帧序号
}

impl Frame {
    pub fn new(rgba_data: Vec<u8>, width: u32, height: u32, frame_id: u64) -> Self {
        Self {
            rgba_data: Arc::new(rgba_data),
            width,
            height,
            frame_id,
        }
    }

    pub fn from_image(image: RgbaImage, frame_id: u64) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, frame_id)
    }

    /// 复制为 image::RgbaImage (缓冲区长度不符时返回 None)
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba_data.to_vec())
    }

    /// 灰度图 (ITU-R 601 亮度)
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let idx = ((y * self.width + x) * 4) as usize;
            let px = &self.rgba_data[idx..idx + 4];
            let luma = (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000;
            image::Luma([luma as u8])
        })
    }

    /// 指定像素的 RGB 值, 越界时返回 None
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let px = &self.rgba_data[idx..idx + 3];
        Some([px[0], px[1], px[2]])
    }
}

/// 视频源接口
///
/// 构造即打开; 失败时构造函数返回错误, 不会得到半初始化的视频源.
pub trait FrameSource {
    /// 视频源名称 (用于日志)
    fn name(&self) -> &str;

    /// 实际输出帧尺寸
    fn frame_size(&self) -> (u32, u32);

    /// 输出像素格式, 不支持时返回 None
    fn pixel_format(&self) -> Option<PixelFormat>;

    /// 下一帧, 设备尚未就绪时返回 None
    fn next_frame(&mut self) -> Option<Frame>;

    /// 保存一帧为JPEG
    fn save_frame(&self, frame: &Frame, path: &Path, quality: u8) -> Result<()> {
        save_jpeg(frame, path, quality)
    }

    /// 关闭视频源
    fn close(&mut self);
}

/// 以指定质量将帧编码为JPEG文件
pub fn save_jpeg(frame: &Frame, path: &Path, quality: u8) -> Result<()> {
    let snapshot_error = |reason: String| ArError::Snapshot {
        path: path.to_path_buf(),
        reason,
    };

    let rgba = frame
        .to_rgba_image()
        .ok_or_else(|| snapshot_error("帧缓冲区尺寸不匹配".to_string()))?;
    let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();

    let file = File::create(path).map_err(|e| snapshot_error(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| snapshot_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_of_white_and_black() {
        let mut img = RgbaImage::from_pixel(2, 1, image::Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 0, image::Rgba([0, 0, 0, 255]));
        let frame = Frame::from_image(img, 0);
        let luma = frame.to_luma();
        assert_eq!(luma.get_pixel(0, 0)[0], 255);
        assert_eq!(luma.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_rgb_at_bounds() {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        let frame = Frame::from_image(img, 0);
        assert_eq!(frame.rgb_at(1, 1), Some([10, 20, 30]));
        assert_eq!(frame.rgb_at(2, 0), None);
    }

    #[test]
    fn test_save_jpeg_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image-0000.jpg");
        let img = RgbaImage::from_pixel(8, 8, image::Rgba([200, 100, 50, 255]));
        save_jpeg(&Frame::from_image(img, 0), &path, 75).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 8);
    }

    #[test]
    fn test_save_jpeg_reports_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("image-0000.jpg");
        let img = RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        let err = save_jpeg(&Frame::from_image(img, 0), &path, 75).unwrap_err();
        assert!(matches!(err, ArError::Snapshot { .. }));
    }
}
