//! # 请求参数
//!
//! `ImageRequest` 携带单次请求的旋转与缩放意图，在整条生产者链中只读共享。

/// 旋转设置。
///
/// 内部角度取值：`USE_EXIF_ROTATION_ANGLE` 表示跟随图片元数据，
/// `DISABLE_ROTATION` 表示关闭旋转，其余为强制附加的顺时针角度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RotationOptions {
    rotation: i32,
    defer_until_rendered: bool,
}

const USE_EXIF_ROTATION_ANGLE: i32 = -1;
const DISABLE_ROTATION: i32 = -2;

impl RotationOptions {
    /// 按图片元数据自动旋转。
    pub fn auto_rotate() -> Self {
        Self {
            rotation: USE_EXIF_ROTATION_ANGLE,
            defer_until_rendered: false,
        }
    }

    /// 完全不旋转，同时忽略 EXIF 方向。
    pub fn disable_rotation() -> Self {
        Self {
            rotation: DISABLE_ROTATION,
            defer_until_rendered: false,
        }
    }

    /// 按元数据旋转，但推迟到渲染时由显示端完成。
    pub fn auto_rotate_at_render_time() -> Self {
        Self {
            rotation: USE_EXIF_ROTATION_ANGLE,
            defer_until_rendered: true,
        }
    }

    /// 在元数据角度之上额外旋转 `angle`（取 0/90/180/270，其它值按 90 向下取整）。
    pub fn force_rotation(angle: u32) -> Self {
        Self {
            rotation: ((angle % 360) / 90 * 90) as i32,
            defer_until_rendered: false,
        }
    }

    pub fn use_image_metadata(&self) -> bool {
        self.rotation == USE_EXIF_ROTATION_ANGLE
    }

    pub fn rotation_enabled(&self) -> bool {
        self.rotation != DISABLE_ROTATION
    }

    /// 强制角度；跟随元数据或关闭旋转时为 `None`。
    pub fn forced_angle(&self) -> Option<u32> {
        u32::try_from(self.rotation).ok()
    }

    pub fn can_defer_until_rendered(&self) -> bool {
        self.defer_until_rendered
    }
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self::auto_rotate()
    }
}

/// 默认位图单边上限。
pub const DEFAULT_MAX_BITMAP_SIZE: f32 = 2048.0;
/// 采样率向上取整的容忍比例。
pub const DEFAULT_ROUNDUP_FRACTION: f32 = 2.0 / 3.0;

/// 目标尺寸。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeOptions {
    pub width: u32,
    pub height: u32,
    /// 解码后单边允许的最大像素数。
    pub max_bitmap_size: f32,
    /// 比例落在两个采样率之间时，超过该比例才取更小的采样率。
    pub round_up_fraction: f32,
}

impl ResizeOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            max_bitmap_size: DEFAULT_MAX_BITMAP_SIZE,
            round_up_fraction: DEFAULT_ROUNDUP_FRACTION,
        }
    }

    /// 宽高均大于 0 时才构造。
    pub fn for_dimensions(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then(|| Self::new(width, height))
    }

    pub fn for_square_size(size: u32) -> Option<Self> {
        Self::for_dimensions(size, size)
    }

    pub fn with_max_bitmap_size(mut self, max_bitmap_size: f32) -> Self {
        self.max_bitmap_size = max_bitmap_size;
        self
    }

    /// 用于日志与附加信息的 `WxH` 文本。
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// 单次图片请求。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRequest {
    pub rotation_options: RotationOptions,
    pub resize_options: Option<ResizeOptions>,
}

impl ImageRequest {
    pub fn new(rotation_options: RotationOptions, resize_options: Option<ResizeOptions>) -> Self {
        Self {
            rotation_options,
            resize_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_constructors_expose_expected_flags() {
        let auto = RotationOptions::auto_rotate();
        assert!(auto.use_image_metadata() && auto.rotation_enabled());
        assert!(!auto.can_defer_until_rendered());
        assert_eq!(auto.forced_angle(), None);

        let disabled = RotationOptions::disable_rotation();
        assert!(!disabled.rotation_enabled());
        assert!(!disabled.use_image_metadata());

        let deferred = RotationOptions::auto_rotate_at_render_time();
        assert!(deferred.can_defer_until_rendered());

        let forced = RotationOptions::force_rotation(450);
        assert_eq!(forced.forced_angle(), Some(90));
        assert!(!forced.use_image_metadata());
    }

    #[test]
    fn resize_options_reject_empty_targets() {
        assert!(ResizeOptions::for_dimensions(0, 10).is_none());
        let square = ResizeOptions::for_square_size(128).expect("square size should build");
        assert_eq!(square.size_label(), "128x128");
        assert_eq!(square.max_bitmap_size, DEFAULT_MAX_BITMAP_SIZE);
    }
}
