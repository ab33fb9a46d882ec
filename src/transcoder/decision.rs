//! # 是否需要变换
//!
//! 三态判断：格式未知 → `Unset`（等待更多字节，不是否定）；
//! 转码器不支持该格式 → `No`；否则“需要旋转 || 可以缩放”。

use super::{ImageTranscoder, TriState, rotation};
use crate::image::{EncodedImage, ExifOrientation};
use crate::request::{ImageRequest, RotationOptions};

/// 综合判断当前快照是否值得变换。
///
/// 关闭旋转或推迟到渲染时，会先把快照上的 EXIF 方向清成 `Undefined`，
/// 避免下游重复应用。
pub fn should_transform(
    request: &ImageRequest,
    image: &mut EncodedImage,
    transcoder: &dyn ImageTranscoder,
) -> TriState {
    let rotation_options = request.rotation_options;
    clear_exif_orientation_if_unused(&rotation_options, image);

    if !image.is_valid() || !image.format().is_known() {
        return TriState::Unset;
    }
    if !transcoder.can_transcode(image.format()) {
        return TriState::No;
    }

    TriState::from(
        should_rotate(&rotation_options, image)
            || transcoder.can_resize(image, &rotation_options, request.resize_options.as_ref()),
    )
}

/// 旋转不可推迟，且存在非零角度或镜像类 EXIF 方向时才需要旋转。
pub fn should_rotate(rotation_options: &RotationOptions, image: &EncodedImage) -> bool {
    !rotation_options.can_defer_until_rendered()
        && (rotation::rotation_angle(rotation_options, image) != 0
            || should_rotate_using_exif_orientation(rotation_options, image))
}

fn should_rotate_using_exif_orientation(
    rotation_options: &RotationOptions,
    image: &EncodedImage,
) -> bool {
    rotation_options.rotation_enabled()
        && !rotation_options.can_defer_until_rendered()
        && image.exif_orientation().is_inverted()
}

fn clear_exif_orientation_if_unused(rotation_options: &RotationOptions, image: &mut EncodedImage) {
    if !rotation_options.rotation_enabled() || rotation_options.can_defer_until_rendered() {
        image.set_exif_orientation(ExifOrientation::Undefined);
    }
}
