//! # 编码图片句柄
//!
//! ## 设计思路
//!
//! `EncodedImage` = 共享的只读字节缓冲 + 每个句柄私有的一份元数据。
//!
//! - `try_clone` 只复制元数据并增加缓冲引用计数；已关闭的句柄克隆得到 `None`。
//! - `close` 幂等：第一次释放缓冲，之后再调用什么都不做；`Drop` 兜底释放。
//! - 元数据只有在格式已知后才可信，`is_metadata_available` 给出判断。
//!
//! 因为元数据按句柄私有，调度用的快照可以放心修改旋转角度、EXIF 方向，
//! 不会影响上游仍在使用的原句柄。

use super::buffer::PooledBuffer;
use super::metadata::{self, ExifOrientation, ImageFormat};

/// 默认采样率（不降采样）。
pub const DEFAULT_SAMPLE_SIZE: u32 = 1;

/// 编码图片句柄。
#[derive(Debug)]
pub struct EncodedImage {
    buffer: Option<PooledBuffer>,
    format: ImageFormat,
    width: Option<u32>,
    height: Option<u32>,
    /// 顺时针旋转角度；`None` 表示尚未解析。
    rotation_angle: Option<u32>,
    exif_orientation: ExifOrientation,
}

impl EncodedImage {
    /// 包装一个缓冲，元数据全部未知。
    pub fn new(buffer: PooledBuffer) -> Self {
        Self {
            buffer: Some(buffer),
            format: ImageFormat::Unknown,
            width: None,
            height: None,
            rotation_angle: None,
            exif_orientation: ExifOrientation::Undefined,
        }
    }

    /// 包装缓冲并立即解析元数据。
    pub fn parsed(buffer: PooledBuffer) -> Self {
        let mut image = Self::new(buffer);
        image.parse_metadata();
        image
    }

    /// 创建共享同一缓冲的新句柄；原句柄已关闭时返回 `None`。
    pub fn try_clone(&self) -> Option<Self> {
        let buffer = self.buffer.clone()?;
        Some(Self {
            buffer: Some(buffer),
            format: self.format,
            width: self.width,
            height: self.height,
            rotation_angle: self.rotation_angle,
            exif_orientation: self.exif_orientation,
        })
    }

    /// 释放缓冲引用。重复调用是空操作。
    pub fn close(&mut self) {
        self.buffer = None;
    }

    pub fn is_valid(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.buffer.as_ref().map(PooledBuffer::as_slice)
    }

    pub fn size(&self) -> usize {
        self.buffer.as_ref().map_or(0, PooledBuffer::len)
    }

    /// 从当前字节重新解析格式、宽高、EXIF 方向与旋转角度。
    ///
    /// 字节不足以识别格式时保留已有的格式标记（例如调用方手动设置的输出格式）。
    pub fn parse_metadata(&mut self) {
        let Some(bytes) = self.bytes() else {
            return;
        };
        let parsed = metadata::parse_metadata(bytes);

        if parsed.format.is_known() {
            self.format = parsed.format;
        }
        if !self.format.is_known() {
            return;
        }

        if let Some((width, height)) = parsed.dimensions {
            self.width = Some(width);
            self.height = Some(height);
        }

        if self.format == ImageFormat::Jpeg {
            self.exif_orientation = parsed.exif_orientation;
            self.rotation_angle = Some(parsed.exif_orientation.auto_rotate_angle());
        } else {
            self.rotation_angle = Some(0);
        }
    }

    /// 宽高与旋转角度是否都已可信。
    pub fn is_metadata_available(&self) -> bool {
        self.format.is_known()
            && self.rotation_angle.is_some()
            && self.width.is_some()
            && self.height.is_some()
    }

    /// 数据是否已完整接收。JPEG 以 EOI 标记判断，其他格式以元数据可用判断。
    pub fn is_complete(&self) -> bool {
        match (self.format, self.bytes()) {
            (_, None) => false,
            (ImageFormat::Jpeg, Some(bytes)) => metadata::is_complete_jpeg(bytes),
            _ => self.is_metadata_available(),
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn set_format(&mut self, format: ImageFormat) {
        self.format = format;
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
    }

    pub fn rotation_angle(&self) -> Option<u32> {
        self.rotation_angle
    }

    pub fn set_rotation_angle(&mut self, angle: u32) {
        self.rotation_angle = Some(angle);
    }

    pub fn exif_orientation(&self) -> ExifOrientation {
        self.exif_orientation
    }

    pub fn set_exif_orientation(&mut self, orientation: ExifOrientation) {
        self.exif_orientation = orientation;
    }
}
