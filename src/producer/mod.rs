//! # 生产者链路
//!
//! 每个生产者把结果推给下游 `Consumer`，请求级别的状态（取消、是否需要中间结果、
//! 监听器）通过共享的 `ProducerContext` 传递。
//!
//! ```text
//! ChunkedSourceProducer ──► ResizeAndRotateProducer ──► 调用方 Consumer
//!                                  │
//!                                  └─ JobScheduler ──► JobExecutor ──► ImageTranscoder
//! ```

pub mod chunked;
pub mod consumer;
pub mod context;
pub mod executor;
pub mod job_scheduler;
pub mod resize_and_rotate;

use std::sync::Arc;

pub use chunked::ChunkedSourceProducer;
pub use consumer::{BaseConsumer, Consumer, Status};
pub use context::{
    CallbackSubscription, ExtraMap, LoggingProducerListener, ProducerContext,
    ProducerContextCallbacks, ProducerListener,
};
pub use executor::{Job, JobExecutor, TokioJobExecutor};
pub use job_scheduler::{JobRunnable, JobScheduler, ScheduledJob};
pub use resize_and_rotate::ResizeAndRotateProducer;

/// 结果生产者。
pub trait Producer: Send + Sync {
    /// 开始为 `context` 描述的请求生产结果，推给 `consumer`。
    fn produce_results(&self, consumer: Arc<dyn Consumer>, context: Arc<ProducerContext>);
}
