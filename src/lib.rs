//! # 渐进式图片变换流水线 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        上游生产者（渐进下载 / ChunkedSourceProducer）     │
//! │                (EncodedImage, Status) × N                │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↓ Consumer::on_new_result
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↓       ResizeAndRotateProducer（变换阶段）         │
//! │                                                          │
//! │  ┌─ should_transform ── Yes / No / Unset                 │
//! │  │     No  → 复制快照直接转发                             │
//! │  │     Unset → 等待更多字节                               │
//! │  │     Yes → JobScheduler 单槽 + 尾沿防抖                 │
//! │  │                                                       │
//! │  ├─ JobExecutor（tokio spawn_blocking / sleep）           │
//! │  │                                                       │
//! │  └─ ImageTranscoder                                      │
//! │        ├─ downsample   采样率                            │
//! │        ├─ rotation     旋转 / 镜像矩阵                    │
//! │        └─ RasterCodec  解码 · 变换 · 编码                 │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↓ BaseConsumer（终止事件只出现一次）
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↓              下游 Consumer                        │
//! └──────────────────────────────────────────────────────────┘
//!         ↑ 取消：ProducerContext::cancel → 清理调度器 → 下游 on_cancellation
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | `TransformError`（库）与 `AppError`（命令行） |
//! | [`config`] | `PipelineConfig`、性能档位与校验 |
//! | [`image`] | `EncodedImage` 句柄、格式/EXIF 元数据、缓冲工厂 |
//! | [`request`] | 旋转与缩放参数 |
//! | [`transcoder`] | 变换判定、采样率、旋转矩阵、栅格编解码与默认转码器 |
//! | [`producer`] | 消费者协议、请求上下文、调度器、执行器与变换阶段 |

pub mod config;
pub mod error;
pub mod image;
pub mod producer;
pub mod request;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{PerformanceProfile, PipelineConfig};
pub use error::{AppError, TransformError};
pub use crate::image::{BufferFactory, EncodedImage, HeapBufferFactory, ImageFormat};
pub use producer::{
    ChunkedSourceProducer, Consumer, LoggingProducerListener, Producer, ProducerContext,
    ResizeAndRotateProducer, Status, TokioJobExecutor,
};
pub use request::{ImageRequest, ResizeOptions, RotationOptions};
pub use transcoder::{ImageTranscoder, SimpleImageTranscoder, TranscodeStatus, TriState};
