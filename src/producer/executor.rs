//! 任务执行器：立即执行与延迟执行两种入口。
//!
//! 变换体是阻塞的解码 + 编码，必须跑在与上游通知不同的线程上；
//! tokio 实现把它放进 `spawn_blocking`，延迟执行用 `tokio::time::sleep` 挂起，不占线程。

use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::TransformError;

/// 可投递的一次性任务。
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait JobExecutor: Send + Sync {
    /// 尽快在后台执行。
    fn execute(&self, job: Job);

    /// `delay` 之后在后台执行。
    fn schedule(&self, delay: Duration, job: Job);
}

/// 基于 tokio 运行时的执行器。
#[derive(Debug, Clone)]
pub struct TokioJobExecutor {
    handle: Handle,
}

impl TokioJobExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 绑定到当前线程所在的运行时。
    pub fn current() -> Result<Self, TransformError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TransformError::InvalidState(format!("当前线程不在 tokio 运行时中：{}", e)))
    }
}

impl JobExecutor for TokioJobExecutor {
    fn execute(&self, job: Job) {
        drop(self.handle.spawn_blocking(job));
    }

    fn schedule(&self, delay: Duration, job: Job) {
        if delay.is_zero() {
            self.execute(job);
            return;
        }
        let handle = self.handle.clone();
        drop(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            drop(handle.spawn_blocking(job));
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execute_runs_job_off_the_caller() {
        let executor = TokioJobExecutor::current().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().id());
        }));
        let worker = rx.await.expect("job should run");
        assert_ne!(worker, std::thread::current().id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn schedule_waits_for_delay() {
        let executor = TokioJobExecutor::current().expect("inside runtime");
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        executor.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx.send(Instant::now());
            }),
        );
        let fired_at = rx.await.expect("job should run");
        assert!(fired_at.duration_since(started) >= Duration::from_millis(50));
    }

    #[test]
    fn current_outside_runtime_is_an_error() {
        let err = TokioJobExecutor::current().expect_err("no runtime on a plain test thread");
        assert_eq!(err.code(), "E_INVALID_STATE");
    }
}
