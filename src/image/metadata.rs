//! # 元数据解析
//!
//! ## 设计思路
//!
//! 从（可能尚未接收完整的）字节中尽力解析格式、宽高与 EXIF 方向。
//! 数据不足时返回“未知”，而不是报错：上游稍后会带着更多字节再次调用。
//!
//! - 格式识别与尺寸读取交给 `image` crate，只读头部。
//! - EXIF 方向读取交给 `kamadak-exif`，视为纯函数。

use std::io::Cursor;

use image::ImageReader;

/// 编码格式；字节不足以判断时为 `Unknown`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Unknown,
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
    Other,
}

impl ImageFormat {
    pub(crate) fn from_image_format(format: image::ImageFormat) -> Self {
        match format {
            image::ImageFormat::Jpeg => Self::Jpeg,
            image::ImageFormat::Png => Self::Png,
            image::ImageFormat::Gif => Self::Gif,
            image::ImageFormat::WebP => Self::WebP,
            image::ImageFormat::Bmp => Self::Bmp,
            _ => Self::Other,
        }
    }

    pub(crate) fn to_image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Png => Some(image::ImageFormat::Png),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Unknown | Self::Other => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Bmp => "bmp",
            Self::Other => "other",
        }
    }
}

/// EXIF 方向标签（0x0112）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExifOrientation {
    #[default]
    Undefined,
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

/// 需要镜像才能正向显示的方向。
pub const INVERTED_EXIF_ORIENTATIONS: [ExifOrientation; 4] = [
    ExifOrientation::FlipHorizontal,
    ExifOrientation::FlipVertical,
    ExifOrientation::Transpose,
    ExifOrientation::Transverse,
];

impl ExifOrientation {
    pub fn from_exif(value: u32) -> Self {
        match value {
            1 => Self::Normal,
            2 => Self::FlipHorizontal,
            3 => Self::Rotate180,
            4 => Self::FlipVertical,
            5 => Self::Transpose,
            6 => Self::Rotate90,
            7 => Self::Transverse,
            8 => Self::Rotate270,
            _ => Self::Undefined,
        }
    }

    pub fn to_exif(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::Normal => 1,
            Self::FlipHorizontal => 2,
            Self::Rotate180 => 3,
            Self::FlipVertical => 4,
            Self::Transpose => 5,
            Self::Rotate90 => 6,
            Self::Transverse => 7,
            Self::Rotate270 => 8,
        }
    }

    /// 是否属于镜像类方向。
    pub fn is_inverted(self) -> bool {
        INVERTED_EXIF_ORIENTATIONS.contains(&self)
    }

    /// 纯旋转类方向对应的顺时针角度；镜像类与未定义均为 0。
    pub fn auto_rotate_angle(self) -> u32 {
        match self {
            Self::Rotate90 => 90,
            Self::Rotate180 => 180,
            Self::Rotate270 => 270,
            _ => 0,
        }
    }
}

/// 一次解析得到的元数据快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedMetadata {
    pub format: ImageFormat,
    pub dimensions: Option<(u32, u32)>,
    pub exif_orientation: ExifOrientation,
}

/// 从字节中解析元数据。字节不足时各字段保持未知。
pub fn parse_metadata(bytes: &[u8]) -> ParsedMetadata {
    let Ok(detected) = image::guess_format(bytes) else {
        return ParsedMetadata::default();
    };
    let format = ImageFormat::from_image_format(detected);

    let dimensions = ImageReader::with_format(Cursor::new(bytes), detected)
        .into_dimensions()
        .ok()
        .filter(|(w, h)| *w > 0 && *h > 0);

    let exif_orientation = if format == ImageFormat::Jpeg {
        read_exif_orientation(bytes)
    } else {
        ExifOrientation::Undefined
    };

    ParsedMetadata {
        format,
        dimensions,
        exif_orientation,
    }
}

/// 读取 EXIF 方向；没有 EXIF 或数据不完整时为 `Undefined`。
pub fn read_exif_orientation(bytes: &[u8]) -> ExifOrientation {
    let mut cursor = Cursor::new(bytes);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return ExifOrientation::Undefined;
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(ExifOrientation::from_exif)
        .unwrap_or(ExifOrientation::Undefined)
}

/// JPEG 是否以 EOI 标记结尾。
pub fn is_complete_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[bytes.len() - 2..] == [0xFF, 0xD9]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jpeg_bytes, jpeg_bytes_with_orientation, png_bytes};

    #[test]
    fn exif_values_roundtrip_and_classify() {
        for value in 1..=8 {
            let orientation = ExifOrientation::from_exif(value);
            assert_eq!(orientation.to_exif(), value);
        }
        assert_eq!(ExifOrientation::from_exif(42), ExifOrientation::Undefined);

        let inverted: Vec<u32> = (0..=8)
            .map(ExifOrientation::from_exif)
            .filter(|o| o.is_inverted())
            .map(ExifOrientation::to_exif)
            .collect();
        assert_eq!(inverted, vec![2, 4, 5, 7]);

        assert_eq!(ExifOrientation::Rotate90.auto_rotate_angle(), 90);
        assert_eq!(ExifOrientation::Transpose.auto_rotate_angle(), 0);
    }

    #[test]
    fn too_few_bytes_yield_unknown_format() {
        let parsed = parse_metadata(&[0xFF]);
        assert_eq!(parsed.format, ImageFormat::Unknown);
        assert_eq!(parsed.dimensions, None);
    }

    #[test]
    fn jpeg_completeness_checks_eoi_marker() {
        assert!(is_complete_jpeg(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]));
        assert!(!is_complete_jpeg(&[0xFF, 0xD8, 0x00]));
        assert!(!is_complete_jpeg(&[]));
    }

    #[test]
    fn jpeg_exif_orientation_is_read() {
        let parsed = parse_metadata(&jpeg_bytes_with_orientation(20, 10, 8));
        assert_eq!(parsed.format, ImageFormat::Jpeg);
        assert_eq!(parsed.dimensions, Some((20, 10)));
        assert_eq!(parsed.exif_orientation, ExifOrientation::Rotate270);

        let plain = parse_metadata(&jpeg_bytes(20, 10, 90));
        assert_eq!(plain.exif_orientation, ExifOrientation::Undefined);
    }

    #[test]
    fn png_has_no_exif_orientation() {
        let parsed = parse_metadata(&png_bytes(5, 6));
        assert_eq!(parsed.format, ImageFormat::Png);
        assert_eq!(parsed.dimensions, Some((5, 6)));
        assert_eq!(parsed.exif_orientation, ExifOrientation::Undefined);
    }
}
