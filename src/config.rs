//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `PipelineConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到底层参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置。
//! - `PerformanceProfile` 负责档位字符串解析与反向输出。
//! - `apply_performance_profile` 将档位转换为具体阈值。
//! - `infer_performance_profile` 用于从当前配置反推档位。
//! - 支持 serde，命令行可直接从 JSON 文件加载。

use std::str::FromStr;
use std::time::Duration;

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// 重新编码的默认质量。
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
/// 两次变换任务之间的最小间隔（毫秒）。
pub const MIN_TRANSFORM_INTERVAL_MS: u64 = 100;
/// 解码位图单边默认上限。
pub const DEFAULT_MAX_BITMAP_SIZE: u32 = 2048;

/// 降采样后的插值滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownscaleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl DownscaleFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fr::FilterType {
        match self {
            Self::Nearest => fr::FilterType::Box,
            Self::Triangle => fr::FilterType::Bilinear,
            Self::CatmullRom => fr::FilterType::CatmullRom,
            Self::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

/// 变换流水线配置。
///
/// 字段覆盖调度（去抖间隔）、采样（位图上限、是否允许缩放）与编码（质量）三个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 两次变换任务之间的最小间隔（毫秒），用于尾沿去抖。
    pub min_transform_interval_ms: u64,
    /// 重新编码质量（1~100）。
    pub default_quality: u8,
    /// 未在 `ResizeOptions` 中指定时使用的位图单边上限。
    pub max_bitmap_size: u32,
    /// 是否允许转码器执行降采样；关闭后采样率恒为 1。
    pub resizing_enabled: bool,
    /// 解码阶段允许分配的内存上限（字节）。
    pub max_decode_bytes: u64,
    /// 采样后精确缩放使用的滤镜。
    pub downscale_filter: DownscaleFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_transform_interval_ms: MIN_TRANSFORM_INTERVAL_MS,
            default_quality: DEFAULT_JPEG_QUALITY,
            max_bitmap_size: DEFAULT_MAX_BITMAP_SIZE,
            resizing_enabled: true,
            max_decode_bytes: 160 * 1024 * 1024,
            downscale_filter: DownscaleFilter::Triangle,
        }
    }
}

/// 性能档位（面向调用方语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先出图速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl PerformanceProfile {
    /// 将档位输出为稳定字符串。
    ///
    /// # 示例
    /// ```rust
    /// use image_transform_pipeline::config::PerformanceProfile;
    ///
    /// assert_eq!(PerformanceProfile::Speed.as_str(), "speed");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl FromStr for PerformanceProfile {
    type Err = TransformError;

    /// 从外部字符串解析档位（忽略大小写与首尾空白）。
    fn from_str(profile: &str) -> Result<Self, Self::Err> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(TransformError::Config(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }
}

impl PipelineConfig {
    /// 最小变换间隔。
    pub fn min_transform_interval(&self) -> Duration {
        Duration::from_millis(self.min_transform_interval_ms)
    }

    /// 基于当前参数反推性能档位。
    pub fn infer_performance_profile(&self) -> PerformanceProfile {
        if self.default_quality >= 95 && self.max_bitmap_size >= 4096 {
            return PerformanceProfile::Quality;
        }

        if self.default_quality <= 75 || self.max_bitmap_size <= 1024 {
            return PerformanceProfile::Speed;
        }

        PerformanceProfile::Balanced
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_performance_profile(&mut self, profile: PerformanceProfile) {
        match profile {
            PerformanceProfile::Quality => {
                self.default_quality = 95;
                self.max_bitmap_size = 4096;
                self.min_transform_interval_ms = MIN_TRANSFORM_INTERVAL_MS;
                self.downscale_filter = DownscaleFilter::CatmullRom;
            }
            PerformanceProfile::Balanced => {
                self.default_quality = DEFAULT_JPEG_QUALITY;
                self.max_bitmap_size = DEFAULT_MAX_BITMAP_SIZE;
                self.min_transform_interval_ms = MIN_TRANSFORM_INTERVAL_MS;
                self.downscale_filter = DownscaleFilter::Triangle;
            }
            PerformanceProfile::Speed => {
                self.default_quality = 75;
                self.max_bitmap_size = 1024;
                self.min_transform_interval_ms = 250;
                self.downscale_filter = DownscaleFilter::Nearest;
            }
        }
    }

    /// 校验参数范围。
    pub fn validate(&self) -> Result<(), TransformError> {
        if !(1..=100).contains(&self.default_quality) {
            return Err(TransformError::Config("default_quality 必须在 1~100 之间".to_string()));
        }
        if self.max_bitmap_size < 64 {
            return Err(TransformError::Config("max_bitmap_size 不能小于 64".to_string()));
        }
        if self.min_transform_interval_ms > 10_000 {
            return Err(TransformError::Config(
                "min_transform_interval_ms 不能大于 10000 毫秒".to_string(),
            ));
        }
        if self.max_decode_bytes < 8 * 1024 * 1024 {
            return Err(TransformError::Config("max_decode_bytes 不能小于 8MB".to_string()));
        }
        Ok(())
    }
}
