//! 默认转码器：解码 → 旋转/镜像 → 重新编码。

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use image::GenericImageView;

use super::codec::{ImageRasterCodec, RasterCodec};
use super::{ImageTranscoder, TranscodeResult, TranscodeStatus, downsample, rotation};
use crate::config::{DEFAULT_JPEG_QUALITY, PipelineConfig};
use crate::error::TransformError;
use crate::image::{DEFAULT_SAMPLE_SIZE, EncodedImage, ImageFormat};
use crate::request::{ResizeOptions, RotationOptions};

const TRANSCODER_ID: &str = "SimpleImageTranscoder";

pub struct SimpleImageTranscoder {
    resizing_enabled: bool,
    max_bitmap_size: u32,
    codec: Arc<dyn RasterCodec>,
}

impl SimpleImageTranscoder {
    pub fn new(resizing_enabled: bool, max_bitmap_size: u32, codec: Arc<dyn RasterCodec>) -> Self {
        Self {
            resizing_enabled,
            max_bitmap_size,
            codec,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.resizing_enabled,
            config.max_bitmap_size,
            Arc::new(ImageRasterCodec::from_config(config)),
        )
    }

    fn sample_size(
        &self,
        image: &EncodedImage,
        rotation_options: &RotationOptions,
        resize_options: Option<&ResizeOptions>,
    ) -> u32 {
        if !self.resizing_enabled {
            return DEFAULT_SAMPLE_SIZE;
        }
        downsample::determine_sample_size(rotation_options, resize_options, image, self.max_bitmap_size)
    }
}

impl std::fmt::Debug for SimpleImageTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleImageTranscoder")
            .field("resizing_enabled", &self.resizing_enabled)
            .field("max_bitmap_size", &self.max_bitmap_size)
            .finish_non_exhaustive()
    }
}

/// JPEG / PNG / WebP 原样使用，其它格式与 `None` 一律回退 JPEG。
fn output_format_or_default(format: Option<ImageFormat>) -> ImageFormat {
    match format {
        Some(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => format,
        _ => ImageFormat::Jpeg,
    }
}

impl ImageTranscoder for SimpleImageTranscoder {
    fn transcode(
        &self,
        image: &EncodedImage,
        output: &mut dyn Write,
        rotation_options: &RotationOptions,
        resize_options: Option<&ResizeOptions>,
        output_format: Option<ImageFormat>,
        quality: Option<u8>,
    ) -> Result<TranscodeResult, TransformError> {
        let started = Instant::now();
        let sample_size = self.sample_size(image, rotation_options, resize_options);

        let raster = match self.codec.decode(image, sample_size) {
            Ok(raster) => raster,
            Err(err) => {
                log::error!("❌ 解码失败（sample={}）：{} [{}]", sample_size, err, err.code());
                return Ok(TranscodeResult::error(sample_size));
            }
        };

        let transformed = match rotation::transformation_matrix(image, rotation_options) {
            Some(matrix) if !matrix.is_identity() => match self.codec.apply_transform(raster, &matrix) {
                Ok(raster) => raster,
                Err(err) if err.is_out_of_memory() => {
                    log::error!("❌ 旋转时内存不足：{}", err);
                    return Ok(TranscodeResult::error(sample_size));
                }
                Err(err) => return Err(err),
            },
            _ => raster,
        };

        let format = output_format_or_default(output_format);
        let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        match self.codec.encode(&transformed, format, quality, output) {
            Ok(()) => {}
            Err(err) if err.is_out_of_memory() => {
                log::error!("❌ 编码时内存不足：{}", err);
                return Ok(TranscodeResult::error(sample_size));
            }
            Err(err) => return Err(err),
        }

        let status = if sample_size > DEFAULT_SAMPLE_SIZE {
            TranscodeStatus::Success
        } else {
            TranscodeStatus::NoResizing
        };
        let output_dimensions = transformed.dimensions();
        log::debug!(
            "✅ 转码完成：{} -> {}x{} {}（sample={}, quality={}）耗时 {}ms",
            image
                .dimensions()
                .map_or_else(|| "?".to_string(), |(w, h)| format!("{}x{}", w, h)),
            output_dimensions.0,
            output_dimensions.1,
            format.as_str(),
            sample_size,
            quality,
            started.elapsed().as_millis()
        );

        Ok(TranscodeResult {
            status,
            sample_size,
            output_dimensions: Some(output_dimensions),
        })
    }

    fn can_resize(
        &self,
        image: &EncodedImage,
        rotation_options: &RotationOptions,
        resize_options: Option<&ResizeOptions>,
    ) -> bool {
        self.sample_size(image, rotation_options, resize_options) > DEFAULT_SAMPLE_SIZE
    }

    fn can_transcode(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn identifier(&self) -> &str {
        TRANSCODER_ID
    }
}
