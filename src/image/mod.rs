//! # 图片数据模型
//!
//! - `buffer`：引用计数字节缓冲、输出流与缓冲工厂协作者
//! - `metadata`：格式识别、尺寸与 EXIF 方向解析
//! - `encoded`：`EncodedImage` 句柄（共享缓冲 + 私有元数据）

pub mod buffer;
pub mod encoded;
pub mod metadata;

pub use buffer::{BufferFactory, HeapBufferFactory, PooledBuffer, PooledOutputStream};
pub use encoded::{DEFAULT_SAMPLE_SIZE, EncodedImage};
pub use metadata::{ExifOrientation, INVERTED_EXIF_ORIENTATIONS, ImageFormat, ParsedMetadata};
