//! 消费者协议与状态位。

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TransformError;
use crate::image::EncodedImage;

/// 每个结果附带的状态位。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(u32);

impl Status {
    pub const NO_FLAGS: Status = Status(0);
    /// 本次请求的最后一个结果。
    pub const IS_LAST: Status = Status(1);
    /// 占位结果，即使缓冲无效也需要处理。
    pub const IS_PLACEHOLDER: Status = Status(1 << 1);
    /// 数据尚未接收完整的中间结果。
    pub const IS_PARTIAL_RESULT: Status = Status(1 << 2);
    /// 已在本链路中完成缩放，下游无需再缩放。
    pub const IS_RESIZING_DONE: Status = Status(1 << 3);

    pub const fn contains(self, flag: Status) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub const fn with(self, flag: Status) -> Self {
        Self(self.0 | flag.0)
    }

    pub const fn without(self, flag: Status) -> Self {
        Self(self.0 & !flag.0)
    }

    pub const fn is_last(self) -> bool {
        self.contains(Self::IS_LAST)
    }

    pub const fn is_not_last(self) -> bool {
        !self.is_last()
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        self.with(rhs)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::IS_LAST, "IS_LAST"),
            (Self::IS_PLACEHOLDER, "IS_PLACEHOLDER"),
            (Self::IS_PARTIAL_RESULT, "IS_PARTIAL_RESULT"),
            (Self::IS_RESIZING_DONE, "IS_RESIZING_DONE"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();

        if names.is_empty() {
            write!(f, "Status(NO_FLAGS)")
        } else {
            write!(f, "Status({})", names.join(" | "))
        }
    }
}

/// 结果接收方。
///
/// 一次请求只会收到一个终止事件：带 `IS_LAST` 的结果、失败或取消，三者互斥。
/// 结果以借用形式传入，需要保留时自行 `try_clone`。
pub trait Consumer: Send + Sync {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status);

    fn on_failure(&self, error: TransformError);

    fn on_cancellation(&self);
}

/// 保证下游只收到一个终止事件的包装。
pub struct BaseConsumer {
    inner: Arc<dyn Consumer>,
    finished: AtomicBool,
}

impl BaseConsumer {
    pub fn new(inner: Arc<dyn Consumer>) -> Self {
        Self {
            inner,
            finished: AtomicBool::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// 抢占终止权；只有第一个调用者返回 `true`。
    fn try_finish(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Consumer for BaseConsumer {
    fn on_new_result(&self, result: Option<&EncodedImage>, status: Status) {
        if status.is_last() {
            if !self.try_finish() {
                log::warn!("⚠️ 已终止的消费者再次收到最终结果，忽略");
                return;
            }
        } else if self.is_finished() {
            log::trace!("终止后的中间结果被丢弃");
            return;
        }
        self.inner.on_new_result(result, status);
    }

    fn on_failure(&self, error: TransformError) {
        if self.try_finish() {
            self.inner.on_failure(error);
        } else {
            log::debug!("终止后的失败被丢弃：{}", error);
        }
    }

    fn on_cancellation(&self) {
        if self.try_finish() {
            self.inner.on_cancellation();
        }
    }
}
