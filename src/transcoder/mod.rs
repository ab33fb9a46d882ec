//! # 转码器模块
//!
//! ## 设计思路
//!
//! 转码器是“判断 + 执行”的无状态单元，回答两个问题并执行一个动作：
//!
//! - `can_resize`：按当前参数计算出的采样率是否大于 1；
//! - `should_transform`（见 `decision`）：需要旋转或可以缩放时才值得变换；
//! - `transcode`：按采样率解码 → 按矩阵旋转/镜像 → 重新编码写入输出流。
//!
//! 平台相关的位图能力抽象为注入的 `RasterCodec`，矩阵与采样率计算保持纯函数。
//!
//! ```text
//! EncodedImage ──► downsample::determine_sample_size
//!      │                     │
//!      ▼                     ▼
//! RasterCodec::decode(bytes, sample_size)
//!      │
//!      ▼  rotation::transformation_matrix（None 时直接复用栅格）
//! RasterCodec::apply_transform
//!      │
//!      ▼
//! RasterCodec::encode(format, quality, sink)
//! ```

pub mod codec;
pub mod decision;
pub mod downsample;
pub mod rotation;
mod simple;

use std::fmt;
use std::io::Write;

use crate::error::TransformError;
use crate::image::{EncodedImage, ImageFormat};
use crate::request::{ResizeOptions, RotationOptions};

pub use codec::{ImageRasterCodec, RasterCodec};
pub use decision::should_transform;
pub use rotation::TransformMatrix;
pub use simple::SimpleImageTranscoder;

/// 三态判断：`Unset` 表示信息不足，应等待而不是跳过。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriState {
    Yes,
    No,
    Unset,
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::Yes } else { Self::No }
    }
}

/// 转码结果状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscodeStatus {
    /// 采样率大于 1，输出确实缩小了。
    Success,
    /// 采样率为 1，仅重新编码（可能带旋转）。
    NoResizing,
    /// 栅格无法产出（解码失败或内存不足）。
    Error,
}

impl TranscodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "TRANSCODING_SUCCESS",
            Self::NoResizing => "TRANSCODING_NO_RESIZING",
            Self::Error => "TRANSCODING_ERROR",
        }
    }
}

/// 一次转码的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeResult {
    pub status: TranscodeStatus,
    pub sample_size: u32,
    /// 写入输出流的图片宽高；失败时为 `None`。
    pub output_dimensions: Option<(u32, u32)>,
}

impl TranscodeResult {
    pub fn error(sample_size: u32) -> Self {
        Self {
            status: TranscodeStatus::Error,
            sample_size,
            output_dimensions: None,
        }
    }

    /// 输出是否确实经过缩小。
    pub fn resized(&self) -> bool {
        self.status == TranscodeStatus::Success
    }
}

impl fmt::Display for TranscodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TranscodeResult ({})", self.status.as_str())
    }
}

/// 转码器协作接口。
pub trait ImageTranscoder: Send + Sync {
    /// 将 `image` 变换后写入 `output`。
    ///
    /// 解码失败以 `TranscodeStatus::Error` 返回，不作为 `Err` 抛出；
    /// 编码阶段的 I/O 或编码器错误通过 `Err` 交给调用方。
    fn transcode(
        &self,
        image: &EncodedImage,
        output: &mut dyn Write,
        rotation_options: &RotationOptions,
        resize_options: Option<&ResizeOptions>,
        output_format: Option<ImageFormat>,
        quality: Option<u8>,
    ) -> Result<TranscodeResult, TransformError>;

    /// 按当前参数是否能缩小图片。
    fn can_resize(
        &self,
        image: &EncodedImage,
        rotation_options: &RotationOptions,
        resize_options: Option<&ResizeOptions>,
    ) -> bool;

    /// 是否能处理该输入格式。
    fn can_transcode(&self, format: ImageFormat) -> bool;

    /// 用于日志与附加信息的标识。
    fn identifier(&self) -> &str;
}
