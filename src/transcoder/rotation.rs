//! # 旋转角度与变换矩阵
//!
//! ## 设计思路
//!
//! 变换只有两类：纯旋转（0/90/180/270）或“先旋转再水平镜像”。
//! 用 `TransformMatrix { rotation, mirror }` 统一表示，后续由栅格编解码器执行。
//!
//! - 强制角度叠加在元数据角度之上。
//! - 镜像类 EXIF 方向先换算成“旋转 + 镜像”，再与强制角度合成：
//!   镜像之后再顺时针转 f，等价于先逆时针转 f 再镜像。
//! - 关闭旋转或推迟到渲染时，不产生任何矩阵。

use crate::image::{EncodedImage, ExifOrientation};
use crate::request::RotationOptions;

/// 旋转（顺时针）后可选水平镜像。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformMatrix {
    rotation: u32,
    mirror: bool,
}

impl TransformMatrix {
    pub fn identity() -> Self {
        Self {
            rotation: 0,
            mirror: false,
        }
    }

    pub fn rotate(angle: u32) -> Self {
        Self {
            rotation: normalize_angle(angle),
            mirror: false,
        }
    }

    pub fn rotate_then_mirror(angle: u32) -> Self {
        Self {
            rotation: normalize_angle(angle),
            mirror: true,
        }
    }

    /// 将镜像类 EXIF 方向换算为正向显示所需的变换。
    pub fn from_inverted_exif(orientation: ExifOrientation) -> Option<Self> {
        match orientation {
            ExifOrientation::FlipHorizontal => Some(Self::rotate_then_mirror(0)),
            ExifOrientation::FlipVertical => Some(Self::rotate_then_mirror(180)),
            ExifOrientation::Transpose => Some(Self::rotate_then_mirror(90)),
            ExifOrientation::Transverse => Some(Self::rotate_then_mirror(270)),
            _ => None,
        }
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror
    }

    pub fn is_identity(&self) -> bool {
        self.rotation == 0 && !self.mirror
    }

    /// 在当前变换之后再顺时针旋转 `angle`。
    pub fn then_rotate(self, angle: u32) -> Self {
        let angle = normalize_angle(angle);
        if self.mirror {
            Self::rotate_then_mirror(self.rotation + 360 - angle)
        } else {
            Self::rotate(self.rotation + angle)
        }
    }

    /// 变换后的宽高。
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match self.rotation {
            90 | 270 => (height, width),
            _ => (width, height),
        }
    }
}

/// 将任意角度规整到 {0, 90, 180, 270}。
pub fn normalize_angle(angle: u32) -> u32 {
    (angle % 360) / 90 * 90
}

/// 元数据中可信的旋转角度。
fn extract_orientation_from_metadata(image: &EncodedImage) -> u32 {
    match image.rotation_angle() {
        Some(angle @ (90 | 180 | 270)) => angle,
        _ => 0,
    }
}

/// 本次变换需要的旋转角度（不含镜像）。
pub fn rotation_angle(rotation_options: &RotationOptions, image: &EncodedImage) -> u32 {
    if !rotation_options.rotation_enabled() {
        return 0;
    }
    let from_metadata = extract_orientation_from_metadata(image);
    match rotation_options.forced_angle() {
        None => from_metadata,
        Some(forced) => (from_metadata + forced) % 360,
    }
}

/// 计算变换矩阵；无需变换时返回 `None`。
pub fn transformation_matrix(
    image: &EncodedImage,
    rotation_options: &RotationOptions,
) -> Option<TransformMatrix> {
    if !rotation_options.rotation_enabled() || rotation_options.can_defer_until_rendered() {
        return None;
    }

    if let Some(base) = TransformMatrix::from_inverted_exif(image.exif_orientation()) {
        let forced = rotation_options.forced_angle().unwrap_or(0);
        return Some(base.then_rotate(forced));
    }

    let angle = rotation_angle(rotation_options, image);
    (angle != 0).then(|| TransformMatrix::rotate(angle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageFormat;
    use crate::test_support::metadata_only_image;

    #[test]
    fn forced_angle_adds_to_metadata_rotation() {
        let image = metadata_only_image(ImageFormat::Jpeg, 10, 20, 90);
        assert_eq!(rotation_angle(&RotationOptions::auto_rotate(), &image), 90);
        assert_eq!(rotation_angle(&RotationOptions::force_rotation(270), &image), 0);
        assert_eq!(rotation_angle(&RotationOptions::force_rotation(180), &image), 270);
        assert_eq!(rotation_angle(&RotationOptions::disable_rotation(), &image), 0);
    }

    #[test]
    fn plain_rotation_produces_rotate_matrix() {
        let image = metadata_only_image(ImageFormat::Jpeg, 10, 20, 180);
        let matrix = transformation_matrix(&image, &RotationOptions::auto_rotate())
            .expect("rotated image needs a matrix");
        assert_eq!(matrix, TransformMatrix::rotate(180));
        assert_eq!(matrix.output_dimensions(10, 20), (10, 20));
    }

    #[test]
    fn upright_image_needs_no_matrix() {
        let image = metadata_only_image(ImageFormat::Jpeg, 10, 20, 0);
        assert!(transformation_matrix(&image, &RotationOptions::auto_rotate()).is_none());
    }

    #[test]
    fn inverted_exif_produces_mirrored_matrix() {
        let mut image = metadata_only_image(ImageFormat::Jpeg, 10, 20, 0);
        image.set_exif_orientation(ExifOrientation::Transpose);
        let matrix = transformation_matrix(&image, &RotationOptions::auto_rotate())
            .expect("inverted orientation needs a matrix");
        assert_eq!(matrix, TransformMatrix::rotate_then_mirror(90));
        assert_eq!(matrix.output_dimensions(10, 20), (20, 10));

        let forced = transformation_matrix(&image, &RotationOptions::force_rotation(90))
            .expect("inverted orientation needs a matrix");
        assert_eq!(forced, TransformMatrix::rotate_then_mirror(0));
    }

    #[test]
    fn deferred_or_disabled_rotation_yields_no_matrix() {
        let mut image = metadata_only_image(ImageFormat::Jpeg, 10, 20, 90);
        image.set_exif_orientation(ExifOrientation::FlipVertical);
        assert!(transformation_matrix(&image, &RotationOptions::disable_rotation()).is_none());
        assert!(
            transformation_matrix(&image, &RotationOptions::auto_rotate_at_render_time()).is_none()
        );
    }

    #[test]
    fn angle_normalization_snaps_to_quadrants() {
        assert_eq!(normalize_angle(450), 90);
        assert_eq!(normalize_angle(359), 270);
        assert_eq!(TransformMatrix::rotate(270).then_rotate(180), TransformMatrix::rotate(90));
        assert!(TransformMatrix::identity().is_identity());
    }
}
