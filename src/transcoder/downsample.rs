//! # 采样率计算
//!
//! ## 设计思路
//!
//! 采样率是纯函数：只依赖旋转设置、目标尺寸、图片宽高/旋转角度与单边上限。
//!
//! 1. 没有目标尺寸或元数据未知时，采样率恒为 1。
//! 2. 先按元数据旋转角度交换宽高，再取宽/高两个比例中较小者，保证输出落在目标框内。
//! 3. JPEG 只能按 2 的幂采样，其它格式按整数步进。
//! 4. 最后用单边上限兜底：最长边 / 采样率 仍超过上限时继续增大采样率。
//!
//! 目标尺寸越大，比例越大，得到的采样率只会更小或不变（单调）。

use crate::image::{DEFAULT_SAMPLE_SIZE, EncodedImage, ImageFormat};
use crate::request::{ResizeOptions, RotationOptions};

/// 采样率上限，防止异常输入导致死循环。
const MAX_SAMPLE_SIZE: u32 = 1 << 16;

/// 计算解码采样率。
pub fn determine_sample_size(
    rotation_options: &RotationOptions,
    resize_options: Option<&ResizeOptions>,
    image: &EncodedImage,
    max_bitmap_size: u32,
) -> u32 {
    let Some(resize_options) = resize_options else {
        return DEFAULT_SAMPLE_SIZE;
    };
    if !image.is_metadata_available() {
        return DEFAULT_SAMPLE_SIZE;
    }
    let Some((width, height)) = image.dimensions() else {
        return DEFAULT_SAMPLE_SIZE;
    };

    let ratio = determine_downsample_ratio(rotation_options, resize_options, image);
    let is_jpeg = image.format() == ImageFormat::Jpeg;
    let mut sample_size = if is_jpeg {
        ratio_to_sample_size_jpeg(ratio, resize_options.round_up_fraction)
    } else {
        ratio_to_sample_size(ratio, resize_options.round_up_fraction)
    };

    let max_dimension = width.max(height) as f32;
    let cap = resize_options.max_bitmap_size.min(max_bitmap_size as f32);
    if cap <= 0.0 {
        return sample_size;
    }
    while max_dimension / sample_size as f32 > cap && sample_size < MAX_SAMPLE_SIZE {
        if is_jpeg {
            sample_size *= 2;
        } else {
            sample_size += 1;
        }
    }
    sample_size
}

/// 目标尺寸与（旋转后）原始尺寸之比，取较小的一边。
pub fn determine_downsample_ratio(
    rotation_options: &RotationOptions,
    resize_options: &ResizeOptions,
    image: &EncodedImage,
) -> f32 {
    let Some((width, height)) = image.dimensions() else {
        return 1.0;
    };
    let swap_dimensions = matches!(metadata_rotation_angle(rotation_options, image), 90 | 270);
    let (width_after_rotation, height_after_rotation) = if swap_dimensions {
        (height, width)
    } else {
        (width, height)
    };

    let width_ratio = resize_options.width as f32 / width_after_rotation as f32;
    let height_ratio = resize_options.height as f32 / height_after_rotation as f32;
    let ratio = width_ratio.min(height_ratio);

    log::trace!(
        "采样比例：目标 {}x{} 原始 {}x{} -> {:.4}",
        resize_options.width,
        resize_options.height,
        width_after_rotation,
        height_after_rotation,
        ratio
    );
    ratio
}

/// 仅当跟随元数据时才计入图片自身的旋转角度。
fn metadata_rotation_angle(rotation_options: &RotationOptions, image: &EncodedImage) -> u32 {
    if !rotation_options.use_image_metadata() {
        return 0;
    }
    match image.rotation_angle() {
        Some(angle @ (90 | 180 | 270)) => angle,
        _ => 0,
    }
}

/// 通用格式：按整数步进选取采样率。
pub fn ratio_to_sample_size(ratio: f32, round_up_fraction: f32) -> u32 {
    if ratio > 0.5 + 0.5 * round_up_fraction || ratio <= 0.0 {
        return DEFAULT_SAMPLE_SIZE;
    }
    let ratio = f64::from(ratio);
    let fraction = f64::from(round_up_fraction);
    let mut sample_size: u32 = 2;
    while sample_size < MAX_SAMPLE_SIZE {
        let s = f64::from(sample_size);
        let interval_length = 1.0 / (s * s - s);
        let compare = 1.0 / s + interval_length * fraction;
        if compare <= ratio {
            return sample_size - 1;
        }
        sample_size += 1;
    }
    MAX_SAMPLE_SIZE
}

/// JPEG：按 2 的幂选取采样率。
pub fn ratio_to_sample_size_jpeg(ratio: f32, round_up_fraction: f32) -> u32 {
    if ratio > 0.5 + 0.5 * round_up_fraction || ratio <= 0.0 {
        return DEFAULT_SAMPLE_SIZE;
    }
    let ratio = f64::from(ratio);
    let fraction = f64::from(round_up_fraction);
    let mut sample_size: u32 = 2;
    while sample_size < MAX_SAMPLE_SIZE {
        let interval_length = 1.0 / (2.0 * f64::from(sample_size));
        let compare = interval_length + interval_length * fraction;
        if compare <= ratio {
            return sample_size;
        }
        sample_size *= 2;
    }
    MAX_SAMPLE_SIZE
}
