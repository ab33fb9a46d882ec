//! # 缩放旋转阶段
//!
//! ## 设计思路
//!
//! 该阶段包在上游生产者外面，对每个到达的 `(image, status)` 做一次判定：
//!
//! 1. 空结果：最终事件原样转发空结果，否则丢弃；
//! 2. 判定 `should_transform`：非最终且 `Unset` 时丢弃，等待更多字节；
//! 3. 不是 `Yes`：复制一份快照直接转发，必要时把旋转角度清零；
//! 4. 是 `Yes`：写入调度器单槽，最终事件或需要中间结果时请求执行。
//!
//! 变换体由调度器在执行器上运行，结果经 `BaseConsumer` 交给下游，
//! 保证终止事件只出现一次。
//!
//! ## 所有权
//!
//! ```text
//! ProducerContext ──callbacks──► TransformingConsumer ──► JobScheduler ──► TransformStage ──► 下游
//!        ▲                                                                      │
//!        └──────────────────────────── Weak ────────────────────────────────────┘
//! ```
//!
//! 上下文强持有订阅的回调，上游生产者返回后已排队的任务仍能被取消；
//! 阶段在终止时显式退订，链路上没有强引用环。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::consumer::{BaseConsumer, Consumer, Status};
use super::context::{
    CallbackSubscription, ExtraMap, ProducerContext, ProducerContextCallbacks, ProducerListener,
};
use super::executor::JobExecutor;
use super::job_scheduler::{JobRunnable, JobScheduler, QUEUE_TIME_KEY, ScheduledJob};
use super::Producer;
use crate::config::PipelineConfig;
use crate::error::TransformError;
use crate::image::{BufferFactory, EncodedImage, ImageFormat};
use crate::request::ImageRequest;
use crate::transcoder::{ImageTranscoder, TranscodeResult, TranscodeStatus, TriState, should_transform};

pub const PRODUCER_NAME: &str = "ResizeAndRotateProducer";

const ORIGINAL_SIZE_KEY: &str = "Original size";
const REQUESTED_SIZE_KEY: &str = "Requested size";
const TRANSCODER_ID_KEY: &str = "Transcoder id";
const TRANSCODING_RESULT_KEY: &str = "Transcoding result";

/// 对上游结果做缩放与旋转的生产者。
pub struct ResizeAndRotateProducer {
    input: Arc<dyn Producer>,
    executor: Arc<dyn JobExecutor>,
    buffer_factory: Arc<dyn BufferFactory>,
    transcoder: Arc<dyn ImageTranscoder>,
    config: PipelineConfig,
    output_format: Option<ImageFormat>,
}

impl ResizeAndRotateProducer {
    pub fn new(
        input: Arc<dyn Producer>,
        executor: Arc<dyn JobExecutor>,
        buffer_factory: Arc<dyn BufferFactory>,
        transcoder: Arc<dyn ImageTranscoder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            input,
            executor,
            buffer_factory,
            transcoder,
            config,
            output_format: None,
        }
    }

    /// 输出格式；未设置时为 JPEG。
    pub fn with_output_format(mut self, format: ImageFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

impl Producer for ResizeAndRotateProducer {
    fn produce_results(&self, consumer: Arc<dyn Consumer>, context: Arc<ProducerContext>) {
        let downstream = Arc::new(BaseConsumer::new(consumer));
        let stage = Arc::new(TransformStage {
            request_id: context.id().to_string(),
            request: context.request().clone(),
            listener: Arc::clone(context.listener()),
            transcoder: Arc::clone(&self.transcoder),
            buffer_factory: Arc::clone(&self.buffer_factory),
            quality: self.config.default_quality,
            output_format: self.output_format,
            downstream,
            cancelled: AtomicBool::new(false),
            subscription: Mutex::new(None),
        });
        let scheduler = JobScheduler::new(
            Arc::clone(&self.executor),
            stage.clone(),
            self.config.min_transform_interval(),
        );
        let transforming = Arc::new(TransformingConsumer {
            stage: Arc::clone(&stage),
            scheduler,
            context: Arc::downgrade(&context),
        });

        let subscription = context.add_callbacks(transforming.clone());
        stage.store_subscription(subscription);

        self.input.produce_results(transforming, context);
    }
}

/// 变换体与转发逻辑，由调度器持有。
struct TransformStage {
    request_id: String,
    request: ImageRequest,
    listener: Arc<dyn ProducerListener>,
    transcoder: Arc<dyn ImageTranscoder>,
    buffer_factory: Arc<dyn BufferFactory>,
    quality: u8,
    output_format: Option<ImageFormat>,
    downstream: Arc<BaseConsumer>,
    cancelled: AtomicBool,
    subscription: Mutex<Option<CallbackSubscription>>,
}

impl TransformStage {
    fn lock_subscription(&self) -> MutexGuard<'_, Option<CallbackSubscription>> {
        match self.subscription.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("阶段订阅锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    fn store_subscription(&self, subscription: CallbackSubscription) {
        if self.downstream.is_finished() {
            subscription.unsubscribe();
            return;
        }
        *self.lock_subscription() = Some(subscription);
        if self.downstream.is_finished() {
            self.tear_down();
        }
    }

    /// 终止后退订上下文回调。
    fn tear_down(&self) {
        let subscription = self.lock_subscription().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn forward_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        self.downstream.on_new_result(result, status);
        if status.is_last() {
            self.tear_down();
        }
    }

    fn forward_failure(&self, error: TransformError) {
        self.downstream.on_failure(error);
        self.tear_down();
    }

    /// 只有第一次取消会通知下游。
    fn cancel(&self, scheduler: &JobScheduler) {
        scheduler.clear_job();
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            log::debug!("🛑 [{}] 变换阶段已取消", self.request_id);
            self.downstream.on_cancellation();
            self.tear_down();
        }
    }

    fn build_extra_map(
        &self,
        image: &EncodedImage,
        result: Option<&TranscodeResult>,
        queued_time_ms: u128,
    ) -> ExtraMap {
        let original_size = image
            .dimensions()
            .map_or_else(|| "unknown".to_string(), |(w, h)| format!("{}x{}", w, h));
        let requested_size = self
            .request
            .resize_options
            .as_ref()
            .map_or_else(|| "Unspecified".to_string(), |resize| resize.size_label());

        let mut extra = ExtraMap::new();
        extra.insert(ORIGINAL_SIZE_KEY.to_string(), original_size);
        extra.insert(REQUESTED_SIZE_KEY.to_string(), requested_size);
        extra.insert(QUEUE_TIME_KEY.to_string(), queued_time_ms.to_string());
        extra.insert(
            TRANSCODER_ID_KEY.to_string(),
            self.transcoder.identifier().to_string(),
        );
        if let Some(result) = result {
            extra.insert(TRANSCODING_RESULT_KEY.to_string(), result.to_string());
        }
        extra
    }

    fn do_transform(&self, image: &EncodedImage, status: Status, queued_time_ms: u128) {
        self.listener.on_producer_start(&self.request_id, PRODUCER_NAME);
        let requires_extra_map = self.listener.requires_extra_map(&self.request_id);

        let mut output = self.buffer_factory.new_output_stream();
        let transcoded = self.transcoder.transcode(
            image,
            &mut output,
            &self.request.rotation_options,
            self.request.resize_options.as_ref(),
            self.output_format,
            Some(self.quality),
        );

        let (result, error) = match transcoded {
            Ok(result) if result.status != TranscodeStatus::Error => (result, None),
            Ok(result) => (
                result,
                Some(TransformError::Decode(format!(
                    "{}（sample={}）",
                    result, result.sample_size
                ))),
            ),
            Err(err) => {
                let extra = requires_extra_map.then(|| self.build_extra_map(image, None, queued_time_ms));
                self.handle_failure(err, status, extra.as_ref());
                return;
            }
        };

        let extra = requires_extra_map.then(|| self.build_extra_map(image, Some(&result), queued_time_ms));
        if let Some(err) = error {
            self.handle_failure(err, status, extra.as_ref());
            return;
        }

        let mut transformed = EncodedImage::new(output.into_buffer());
        transformed.set_format(self.output_format.unwrap_or(ImageFormat::Jpeg));
        transformed.parse_metadata();
        if self.request.rotation_options.can_defer_until_rendered() {
            if let Some(angle) = image.rotation_angle() {
                transformed.set_rotation_angle(angle);
            }
        }

        let status = if result.resized() {
            status | Status::IS_RESIZING_DONE
        } else {
            status
        };

        self.listener
            .on_producer_finish_with_success(&self.request_id, PRODUCER_NAME, extra.as_ref());
        if self.is_cancelled() {
            log::debug!("[{}] 变换完成时请求已取消，丢弃结果", self.request_id);
        } else {
            self.forward_new_result(Some(&transformed), status);
        }
        transformed.close();
    }

    fn handle_failure(&self, error: TransformError, status: Status, extra: Option<&ExtraMap>) {
        self.listener
            .on_producer_finish_with_failure(&self.request_id, PRODUCER_NAME, &error, extra);
        if status.is_last() && !self.is_cancelled() {
            self.forward_failure(error);
        } else {
            log::debug!("[{}] 中间结果变换失败，等待后续数据重试：{}", self.request_id, error);
        }
    }
}

impl JobRunnable for TransformStage {
    fn run(&self, job: ScheduledJob) {
        let ScheduledJob {
            mut image,
            status,
            queued_time,
        } = job;
        if self.is_cancelled() {
            return;
        }
        self.do_transform(&image, status, queued_time.as_millis());
        image.close();
    }
}

/// 挂在上游生产者后面的消费者，同时订阅上下文回调。
struct TransformingConsumer {
    stage: Arc<TransformStage>,
    scheduler: Arc<JobScheduler>,
    context: Weak<ProducerContext>,
}

impl TransformingConsumer {
    fn is_intermediate_result_expected(&self) -> bool {
        self.context
            .upgrade()
            .is_some_and(|context| context.is_intermediate_result_expected())
    }

    fn on_null_result(&self, status: Status) {
        if status.is_last() {
            self.stage.forward_new_result(None, status);
        }
    }

    /// 不变换时直接转发；旋转不可推迟且角度非零时清零角度。
    fn forward_untransformed(&self, mut snapshot: EncodedImage, status: Status) {
        let rotation_options = self.stage.request.rotation_options;
        if !rotation_options.can_defer_until_rendered()
            && snapshot.rotation_angle().is_some_and(|angle| angle != 0)
        {
            snapshot.set_rotation_angle(0);
        }
        self.stage.forward_new_result(Some(&snapshot), status);
        snapshot.close();
    }
}

impl Consumer for TransformingConsumer {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        if self.stage.is_cancelled() {
            return;
        }
        let Some(mut snapshot) = result.and_then(EncodedImage::try_clone) else {
            self.on_null_result(status);
            return;
        };

        let decision = should_transform(&self.stage.request, &mut snapshot, self.stage.transcoder.as_ref());
        log::trace!(
            "[{}] 收到结果 {:?}，格式 {}，判定 {:?}",
            self.stage.request_id,
            status,
            snapshot.format().as_str(),
            decision
        );

        if status.is_not_last() && decision == TriState::Unset {
            return;
        }
        if decision != TriState::Yes {
            self.forward_untransformed(snapshot, status);
            return;
        }

        if self.scheduler.update_job(snapshot, status)
            && (status.is_last() || self.is_intermediate_result_expected())
        {
            self.scheduler.schedule_job();
        }
    }

    fn on_failure(&self, error: TransformError) {
        self.scheduler.clear_job();
        self.stage.forward_failure(error);
    }

    fn on_cancellation(&self) {
        self.stage.cancel(&self.scheduler);
    }
}

impl ProducerContextCallbacks for TransformingConsumer {
    fn on_cancellation_requested(&self) {
        self.stage.cancel(&self.scheduler);
    }

    fn on_is_intermediate_result_expected_changed(&self) {
        if self.is_intermediate_result_expected() {
            self.scheduler.schedule_job();
        }
    }
}
