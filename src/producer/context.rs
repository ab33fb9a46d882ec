//! # 请求上下文
//!
//! ## 设计思路
//!
//! 上下文在整条生产者链路上共享，承载三类信息：
//!
//! - 请求本身（旋转/缩放参数）与请求 id；
//! - 可变状态：是否取消、是否需要中间结果；
//! - 监听器：各阶段开始/结束的观测回调。
//!
//! 阶段通过 `add_callbacks` 订阅状态变化，拿到的 `CallbackSubscription`
//! 在阶段结束时显式 `unsubscribe`，避免上下文长期持有已终止阶段的回调。
//! 回调总是在释放内部锁之后调用，回调里可以安全地再次访问上下文。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use crate::error::TransformError;
use crate::request::ImageRequest;

/// 阶段结束时附带的观测信息。
pub type ExtraMap = BTreeMap<String, String>;

/// 阶段观测回调。
pub trait ProducerListener: Send + Sync {
    fn on_producer_start(&self, request_id: &str, producer_name: &str);

    fn on_producer_finish_with_success(
        &self,
        request_id: &str,
        producer_name: &str,
        extra_map: Option<&ExtraMap>,
    );

    fn on_producer_finish_with_failure(
        &self,
        request_id: &str,
        producer_name: &str,
        error: &TransformError,
        extra_map: Option<&ExtraMap>,
    );

    fn on_producer_finish_with_cancellation(
        &self,
        request_id: &str,
        producer_name: &str,
        extra_map: Option<&ExtraMap>,
    );

    /// 返回 `false` 时阶段完全跳过附加信息的构造。
    fn requires_extra_map(&self, request_id: &str) -> bool;
}

/// 上下文状态变化回调。
pub trait ProducerContextCallbacks: Send + Sync {
    fn on_cancellation_requested(&self);

    fn on_is_intermediate_result_expected_changed(&self);
}

#[derive(Default)]
struct ContextState {
    cancelled: bool,
    intermediate_result_expected: bool,
    callbacks: Vec<(u64, Arc<dyn ProducerContextCallbacks>)>,
}

pub struct ProducerContext {
    id: String,
    request: ImageRequest,
    listener: Arc<dyn ProducerListener>,
    state: Mutex<ContextState>,
    next_subscription_id: AtomicU64,
}

impl ProducerContext {
    pub fn new(
        id: impl Into<String>,
        request: ImageRequest,
        listener: Arc<dyn ProducerListener>,
        intermediate_result_expected: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            request,
            listener,
            state: Mutex::new(ContextState {
                intermediate_result_expected,
                ..ContextState::default()
            }),
            next_subscription_id: AtomicU64::new(1),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("请求上下文状态锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &ImageRequest {
        &self.request
    }

    pub fn listener(&self) -> &Arc<dyn ProducerListener> {
        &self.listener
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock_state().cancelled
    }

    pub fn is_intermediate_result_expected(&self) -> bool {
        self.lock_state().intermediate_result_expected
    }

    /// 订阅状态变化。上下文已取消时立即回调一次 `on_cancellation_requested`。
    pub fn add_callbacks(
        self: &Arc<Self>,
        callbacks: Arc<dyn ProducerContextCallbacks>,
    ) -> CallbackSubscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let already_cancelled = {
            let mut state = self.lock_state();
            state.callbacks.push((id, Arc::clone(&callbacks)));
            state.cancelled
        };
        if already_cancelled {
            callbacks.on_cancellation_requested();
        }
        CallbackSubscription {
            context: Arc::downgrade(self),
            id,
        }
    }

    fn remove_callbacks(&self, id: u64) {
        let removed = {
            let mut state = self.lock_state();
            state
                .callbacks
                .iter()
                .position(|(existing, _)| *existing == id)
                .map(|index| state.callbacks.remove(index))
        };
        drop(removed);
    }

    /// 取消请求。只有第一次调用会通知订阅者。
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            Self::snapshot_callbacks(&state)
        };
        log::debug!("🛑 请求 {} 已取消，通知 {} 个订阅者", self.id, callbacks.len());
        for callbacks in callbacks {
            callbacks.on_cancellation_requested();
        }
    }

    /// 更新“是否需要中间结果”。值没有变化时不通知。
    pub fn set_intermediate_result_expected(&self, expected: bool) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.intermediate_result_expected == expected {
                return;
            }
            state.intermediate_result_expected = expected;
            Self::snapshot_callbacks(&state)
        };
        for callbacks in callbacks {
            callbacks.on_is_intermediate_result_expected_changed();
        }
    }

    fn snapshot_callbacks(state: &ContextState) -> Vec<Arc<dyn ProducerContextCallbacks>> {
        state
            .callbacks
            .iter()
            .map(|(_, callbacks)| Arc::clone(callbacks))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock_state().callbacks.len()
    }
}

impl std::fmt::Debug for ProducerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerContext")
            .field("id", &self.id)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// `add_callbacks` 返回的订阅句柄。
#[derive(Debug)]
pub struct CallbackSubscription {
    context: Weak<ProducerContext>,
    id: u64,
}

impl CallbackSubscription {
    /// 取消订阅；上下文已释放时什么都不做。
    pub fn unsubscribe(self) {
        if let Some(context) = self.context.upgrade() {
            context.remove_callbacks(self.id);
        }
    }
}

/// 把阶段的开始/结束写入日志的监听器。
pub struct LoggingProducerListener {
    with_extra_map: bool,
    started_at: Mutex<HashMap<(String, String), Instant>>,
}

impl LoggingProducerListener {
    pub fn new(with_extra_map: bool) -> Self {
        Self {
            with_extra_map,
            started_at: Mutex::new(HashMap::new()),
        }
    }

    fn take_elapsed_ms(&self, request_id: &str, producer_name: &str) -> Option<u128> {
        let mut started_at = match self.started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("监听器计时表锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        };
        started_at
            .remove(&(request_id.to_string(), producer_name.to_string()))
            .map(|started| started.elapsed().as_millis())
    }

    fn format_extra(extra_map: Option<&ExtraMap>) -> String {
        extra_map
            .and_then(|map| serde_json::to_string(map).ok())
            .unwrap_or_else(|| "-".to_string())
    }
}

impl Default for LoggingProducerListener {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ProducerListener for LoggingProducerListener {
    fn on_producer_start(&self, request_id: &str, producer_name: &str) {
        let mut started_at = match self.started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("监听器计时表锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        };
        started_at.insert(
            (request_id.to_string(), producer_name.to_string()),
            Instant::now(),
        );
        log::debug!("▶️ [{}] {} 开始", request_id, producer_name);
    }

    fn on_producer_finish_with_success(
        &self,
        request_id: &str,
        producer_name: &str,
        extra_map: Option<&ExtraMap>,
    ) {
        let elapsed = self.take_elapsed_ms(request_id, producer_name);
        log::info!(
            "✅ [{}] {} 完成，耗时 {}ms，附加信息 {}",
            request_id,
            producer_name,
            elapsed.unwrap_or_default(),
            Self::format_extra(extra_map)
        );
    }

    fn on_producer_finish_with_failure(
        &self,
        request_id: &str,
        producer_name: &str,
        error: &TransformError,
        extra_map: Option<&ExtraMap>,
    ) {
        let elapsed = self.take_elapsed_ms(request_id, producer_name);
        log::warn!(
            "❌ [{}] {} 失败（{} / {}），耗时 {}ms：{}，附加信息 {}",
            request_id,
            producer_name,
            error.stage(),
            error.code(),
            elapsed.unwrap_or_default(),
            error,
            Self::format_extra(extra_map)
        );
    }

    fn on_producer_finish_with_cancellation(
        &self,
        request_id: &str,
        producer_name: &str,
        extra_map: Option<&ExtraMap>,
    ) {
        let elapsed = self.take_elapsed_ms(request_id, producer_name);
        log::info!(
            "🛑 [{}] {} 已取消，耗时 {}ms，附加信息 {}",
            request_id,
            producer_name,
            elapsed.unwrap_or_default(),
            Self::format_extra(extra_map)
        );
    }

    fn requires_extra_map(&self, _request_id: &str) -> bool {
        self.with_extra_map
    }
}
