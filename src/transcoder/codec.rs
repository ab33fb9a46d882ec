//! # 栅格编解码
//!
//! ## 设计思路
//!
//! 把“字节 → 栅格 → 字节”的平台能力收敛到 `RasterCodec` 一个接口，
//! 转码器只关心采样率与矩阵。默认实现 `ImageRasterCodec` 基于 `image` crate：
//!
//! 1. 读取 header 尺寸，按采样后的尺寸预估内存，超限直接拒绝
//! 2. 带分配上限完整解码（允许数据不完整的渐进输入）
//! 3. 采样率大于 1 时用 `fast_image_resize` 缩小，失败回退 `image::resize_exact`
//! 4. 旋转/镜像由 `imageops` 完成
//! 5. 按目标格式与质量编码到输出流

use std::io::{Cursor, Write};

use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageBuffer, ImageEncoder, ImageReader, Rgba};

use super::TransformMatrix;
use crate::config::{DownscaleFilter, PipelineConfig};
use crate::error::TransformError;
use crate::image::{EncodedImage, ImageFormat};

/// 注入的栅格能力。
pub trait RasterCodec: Send + Sync {
    /// 按采样率解码，输出尺寸约为原尺寸 / `sample_size`（向上取整）。
    fn decode(&self, image: &EncodedImage, sample_size: u32) -> Result<DynamicImage, TransformError>;

    /// 应用旋转/镜像矩阵。
    fn apply_transform(
        &self,
        raster: DynamicImage,
        matrix: &TransformMatrix,
    ) -> Result<DynamicImage, TransformError>;

    /// 编码到 `sink`。`quality` 只对有损格式生效，WebP 输出为无损。
    fn encode(
        &self,
        raster: &DynamicImage,
        format: ImageFormat,
        quality: u8,
        sink: &mut dyn Write,
    ) -> Result<(), TransformError>;
}

/// 基于 `image` + `fast_image_resize` 的默认实现。
#[derive(Debug, Clone)]
pub struct ImageRasterCodec {
    max_decode_bytes: u64,
    filter: DownscaleFilter,
}

impl ImageRasterCodec {
    pub fn new(max_decode_bytes: u64, filter: DownscaleFilter) -> Self {
        Self {
            max_decode_bytes,
            filter,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_decode_bytes, config.downscale_filter)
    }

    fn validate_decoded_memory_limits(&self, width: u32, height: u32) -> Result<(), TransformError> {
        let estimated = u64::from(width)
            .checked_mul(u64::from(height))
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| TransformError::OutOfMemory("图片解码内存估算溢出".to_string()))?;

        if estimated > self.max_decode_bytes {
            return Err(TransformError::OutOfMemory(format!(
                "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
                estimated as f64 / 1024.0 / 1024.0,
                self.max_decode_bytes as f64 / 1024.0 / 1024.0
            )));
        }
        Ok(())
    }

    fn downscale(&self, image: DynamicImage, sample_size: u32) -> DynamicImage {
        let (width, height) = image.dimensions();
        let target_width = width.div_ceil(sample_size).max(1);
        let target_height = height.div_ceil(sample_size).max(1);
        if (target_width, target_height) == (width, height) {
            return image;
        }

        log::debug!(
            "🧩 采样缩小：{}x{} -> {}x{}（sample={}, filter={:?}）",
            width,
            height,
            target_width,
            target_height,
            sample_size,
            self.filter
        );

        match Self::resize_with_fast_image_resize(&image, target_width, target_height, self.filter) {
            Ok(resized) => resized,
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 缩小失败，回退 image::resize_exact：{}", err);
                image.resize_exact(target_width, target_height, self.filter.to_image_filter())
            }
        }
    }

    fn resize_with_fast_image_resize(
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
        filter: DownscaleFilter,
    ) -> Result<DynamicImage, TransformError> {
        let src = image.to_rgba8();
        let (src_width, src_height) = src.dimensions();

        let src_image =
            fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
                .map_err(|e| TransformError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| TransformError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        let rgba =
            ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
                .ok_or_else(|| TransformError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))?;

        Ok(DynamicImage::ImageRgba8(rgba))
    }
}

impl Default for ImageRasterCodec {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RasterCodec for ImageRasterCodec {
    fn decode(&self, image: &EncodedImage, sample_size: u32) -> Result<DynamicImage, TransformError> {
        let bytes = image
            .bytes()
            .ok_or_else(|| TransformError::InvalidState("图片缓冲已释放".to_string()))?;
        let format = match image.format().to_image_format() {
            Some(format) => format,
            None => image::guess_format(bytes)?,
        };

        if let Some((width, height)) = image.dimensions() {
            let sample_size = sample_size.max(1);
            self.validate_decoded_memory_limits(
                width.div_ceil(sample_size),
                height.div_ceil(sample_size),
            )?;
        }

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.max_decode_bytes);
        reader.limits(limits);

        let decoded = reader.decode()?;
        if sample_size > 1 {
            Ok(self.downscale(decoded, sample_size))
        } else {
            Ok(decoded)
        }
    }

    fn apply_transform(
        &self,
        raster: DynamicImage,
        matrix: &TransformMatrix,
    ) -> Result<DynamicImage, TransformError> {
        let rotated = match matrix.rotation() {
            90 => raster.rotate90(),
            180 => raster.rotate180(),
            270 => raster.rotate270(),
            _ => raster,
        };
        Ok(if matrix.is_mirrored() {
            rotated.fliph()
        } else {
            rotated
        })
    }

    fn encode(
        &self,
        raster: &DynamicImage,
        format: ImageFormat,
        quality: u8,
        sink: &mut dyn Write,
    ) -> Result<(), TransformError> {
        let (width, height) = raster.dimensions();
        let result = match format {
            ImageFormat::Png => {
                let rgba = raster.to_rgba8();
                PngEncoder::new(sink).write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
            }
            ImageFormat::WebP => {
                log::debug!("WebP 仅支持无损编码，忽略质量 {}", quality);
                let rgba = raster.to_rgba8();
                WebPEncoder::new_lossless(sink).write_image(
                    rgba.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgba8,
                )
            }
            _ => {
                let rgb = raster.to_rgb8();
                JpegEncoder::new_with_quality(sink, quality.clamp(1, 100)).write_image(
                    rgb.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
        };

        result.map_err(|e| match TransformError::from(e) {
            TransformError::Decode(message) => TransformError::Encode(message),
            other => other,
        })
    }
}
