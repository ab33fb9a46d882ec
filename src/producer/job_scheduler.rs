//! # 任务调度器（尾沿防抖 + 单槽合并）
//!
//! ## 设计思路
//!
//! 上游“又来了一批字节”的通知远快于变换的执行速度。调度器保证：
//!
//! - 同一时刻最多一个变换体在执行；
//! - 两次执行之间至少间隔 `min_interval`（从上一次执行结束算起）；
//! - 真正执行时读取的是**触发那一刻**槽里最新的快照，而不是提交时的快照。
//!
//! ## 实现思路
//!
//! 所有可变状态放在一把锁里：单槽 `Slot { Empty, Pending, Cleared }` 与
//! 执行状态 `JobState { Idle, Queued, Running, RunningAndPending }`。
//!
//! ```text
//!            schedule_job                 executor 触发
//!   Idle ───────────────────► Queued ─────────────────► Running
//!    ▲                                                   │  │
//!    │        执行结束（无待办）                          │  │ schedule_job
//!    └───────────────────────────────────────────────────┘  ▼
//!                       Queued ◄──── 执行结束 ──── RunningAndPending
//! ```
//!
//! `Cleared` 是终态：之后的 `update_job` 直接丢弃输入，已排队的任务在
//! 触发时检查到 `Cleared` 就不再执行变换体。替换或清理出来的旧快照总在
//! 锁外释放。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::consumer::Status;
use super::executor::JobExecutor;
use crate::image::EncodedImage;

/// 附加信息中排队耗时的键名。
pub const QUEUE_TIME_KEY: &str = "queueTime";

/// 交给变换体的一次任务。
#[derive(Debug)]
pub struct ScheduledJob {
    pub image: EncodedImage,
    pub status: Status,
    /// 从提交到开始执行的耗时。
    pub queued_time: Duration,
}

/// 变换体。
pub trait JobRunnable: Send + Sync {
    fn run(&self, job: ScheduledJob);
}

enum Slot {
    Empty,
    Pending { image: EncodedImage, status: Status },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Idle,
    Queued,
    Running,
    RunningAndPending,
}

struct SchedulerState {
    slot: Slot,
    job_state: JobState,
    job_submit_time: Option<Instant>,
    job_start_time: Option<Instant>,
    last_finish_time: Option<Instant>,
}

fn debounce_remaining(elapsed: Duration, min_interval: Duration) -> Option<Duration> {
    if elapsed >= min_interval {
        None
    } else {
        Some(min_interval - elapsed)
    }
}

/// 距离下一次允许执行还需等待多久。
fn delay_since_last_finish(
    last_finish: Option<Instant>,
    now: Instant,
    min_interval: Duration,
) -> Duration {
    last_finish
        .and_then(|finished| debounce_remaining(now.saturating_duration_since(finished), min_interval))
        .unwrap_or(Duration::ZERO)
}

#[derive(Debug, PartialEq, Eq)]
enum ScheduleDecision {
    Rejected,
    Enqueue { delay: Duration },
    AlreadyQueued,
    MarkPending,
    AlreadyPending,
}

fn decide_schedule(
    job_state: JobState,
    last_finish: Option<Instant>,
    now: Instant,
    min_interval: Duration,
) -> ScheduleDecision {
    match job_state {
        JobState::Idle => ScheduleDecision::Enqueue {
            delay: delay_since_last_finish(last_finish, now, min_interval),
        },
        JobState::Queued => ScheduleDecision::AlreadyQueued,
        JobState::Running => ScheduleDecision::MarkPending,
        JobState::RunningAndPending => ScheduleDecision::AlreadyPending,
    }
}

/// 快照是否值得交给变换体：最终结果、占位结果或缓冲仍有效。
fn should_process(image: &EncodedImage, status: Status) -> bool {
    status.is_last() || status.contains(Status::IS_PLACEHOLDER) || image.is_valid()
}

pub struct JobScheduler {
    executor: Arc<dyn JobExecutor>,
    runnable: Arc<dyn JobRunnable>,
    min_interval: Duration,
    state: Mutex<SchedulerState>,
}

impl JobScheduler {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        runnable: Arc<dyn JobRunnable>,
        min_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            runnable,
            min_interval,
            state: Mutex::new(SchedulerState {
                slot: Slot::Empty,
                job_state: JobState::Idle,
                job_submit_time: None,
                job_start_time: None,
                last_finish_time: None,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("任务调度状态锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 用新快照替换槽内快照，不触发执行。
    ///
    /// 已清理或快照不值得处理时返回 `false`，传入的快照随之释放。
    pub fn update_job(&self, image: EncodedImage, status: Status) -> bool {
        if !should_process(&image, status) {
            return false;
        }
        let previous = {
            let mut state = self.lock_state();
            if matches!(state.slot, Slot::Cleared) {
                drop(state);
                log::trace!("调度器已清理，丢弃新的快照");
                return false;
            }
            std::mem::replace(&mut state.slot, Slot::Pending { image, status })
        };
        drop(previous);
        true
    }

    /// 请求执行槽内快照。槽为空、已清理或快照不值得处理时返回 `false`。
    pub fn schedule_job(self: &Arc<Self>) -> bool {
        let now = Instant::now();
        let decision = {
            let mut state = self.lock_state();
            let processable = match &state.slot {
                Slot::Pending { image, status } => should_process(image, *status),
                Slot::Empty | Slot::Cleared => false,
            };
            if !processable {
                ScheduleDecision::Rejected
            } else {
                let decision =
                    decide_schedule(state.job_state, state.last_finish_time, now, self.min_interval);
                match decision {
                    ScheduleDecision::Enqueue { .. } => {
                        state.job_submit_time = Some(now);
                        state.job_state = JobState::Queued;
                    }
                    ScheduleDecision::MarkPending => {
                        state.job_state = JobState::RunningAndPending;
                    }
                    _ => {}
                }
                decision
            }
        };

        match decision {
            ScheduleDecision::Rejected => false,
            ScheduleDecision::Enqueue { delay } => {
                self.enqueue_job(delay);
                true
            }
            ScheduleDecision::AlreadyQueued
            | ScheduleDecision::MarkPending
            | ScheduleDecision::AlreadyPending => true,
        }
    }

    /// 进入终态并释放槽内快照。重复调用是空操作。
    pub fn clear_job(&self) {
        let previous = {
            let mut state = self.lock_state();
            std::mem::replace(&mut state.slot, Slot::Cleared)
        };
        if let Slot::Pending { .. } = previous {
            log::trace!("清理调度器，释放待处理快照");
        }
        drop(previous);
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self.lock_state().slot, Slot::Cleared)
    }

    /// 最近一次任务从提交到开始执行的耗时，仅用于观测。
    pub fn queued_time(&self) -> Duration {
        let state = self.lock_state();
        match (state.job_submit_time, state.job_start_time) {
            (Some(submitted), Some(started)) => started.saturating_duration_since(submitted),
            _ => Duration::ZERO,
        }
    }

    fn enqueue_job(self: &Arc<Self>, delay: Duration) {
        let scheduler = Arc::clone(self);
        let job = Box::new(move || scheduler.do_job());
        if delay.is_zero() {
            self.executor.execute(job);
        } else {
            log::trace!("⏱️ 变换任务延迟 {}ms 执行（尾沿防抖）", delay.as_millis());
            self.executor.schedule(delay, job);
        }
    }

    fn do_job(self: &Arc<Self>) {
        let now = Instant::now();
        let taken = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut state.slot, Slot::Empty) {
                Slot::Pending { image, status } => {
                    state.job_state = JobState::Running;
                    state.job_start_time = Some(now);
                    let queued_time = state
                        .job_submit_time
                        .map(|submitted| now.saturating_duration_since(submitted))
                        .unwrap_or_default();
                    Some(ScheduledJob {
                        image,
                        status,
                        queued_time,
                    })
                }
                Slot::Cleared => {
                    state.slot = Slot::Cleared;
                    state.job_state = JobState::Idle;
                    None
                }
                Slot::Empty => {
                    state.job_state = JobState::Idle;
                    None
                }
            }
        };

        let Some(job) = taken else {
            log::trace!("变换任务触发时槽为空或已清理，跳过");
            return;
        };

        if should_process(&job.image, job.status) {
            self.runnable.run(job);
        }
        self.on_job_finished();
    }

    fn on_job_finished(self: &Arc<Self>) {
        let now = Instant::now();
        let delay = {
            let mut state = self.lock_state();
            state.last_finish_time = Some(now);
            let cleared = matches!(state.slot, Slot::Cleared);
            if state.job_state == JobState::RunningAndPending && !cleared {
                state.job_submit_time = Some(now);
                state.job_state = JobState::Queued;
                Some(self.min_interval)
            } else {
                state.job_state = JobState::Idle;
                None
            }
        };

        if let Some(delay) = delay {
            self.enqueue_job(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BufferFactory, HeapBufferFactory};
    use crate::test_support::ManualExecutor;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingRunnable {
        runs: StdMutex<Vec<(usize, Status)>>,
    }

    impl RecordingRunnable {
        fn runs(&self) -> Vec<(usize, Status)> {
            self.runs.lock().expect("runs lock").clone()
        }
    }

    impl JobRunnable for RecordingRunnable {
        fn run(&self, job: ScheduledJob) {
            self.runs.lock().expect("runs lock").push((job.image.size(), job.status));
        }
    }

    fn scheduler(
        min_interval: Duration,
    ) -> (Arc<JobScheduler>, Arc<ManualExecutor>, Arc<RecordingRunnable>) {
        let executor = Arc::new(ManualExecutor::default());
        let runnable = Arc::new(RecordingRunnable::default());
        let scheduler = JobScheduler::new(executor.clone(), runnable.clone(), min_interval);
        (scheduler, executor, runnable)
    }

    #[test]
    fn debounce_remaining_returns_expected_values() {
        let min = Duration::from_millis(100);
        assert_eq!(debounce_remaining(Duration::from_millis(30), min), Some(Duration::from_millis(70)));
        assert_eq!(debounce_remaining(Duration::from_millis(100), min), None);
        assert_eq!(debounce_remaining(Duration::from_millis(250), min), None);
    }

    #[test]
    fn decide_schedule_follows_job_state() {
        let now = Instant::now();
        let min = Duration::from_millis(100);
        assert_eq!(
            decide_schedule(JobState::Idle, None, now, min),
            ScheduleDecision::Enqueue { delay: Duration::ZERO }
        );
        assert_eq!(decide_schedule(JobState::Queued, None, now, min), ScheduleDecision::AlreadyQueued);
        assert_eq!(decide_schedule(JobState::Running, None, now, min), ScheduleDecision::MarkPending);
        assert_eq!(
            decide_schedule(JobState::RunningAndPending, None, now, min),
            ScheduleDecision::AlreadyPending
        );
        match decide_schedule(JobState::Idle, Some(now), now, min) {
            ScheduleDecision::Enqueue { delay } => assert_eq!(delay, min),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn schedule_on_empty_slot_is_rejected() {
        let (scheduler, executor, _) = scheduler(Duration::from_millis(100));
        assert!(!scheduler.schedule_job());
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn repeated_schedules_collapse_and_use_latest_snapshot() {
        let factory = HeapBufferFactory::new();
        let (scheduler, executor, runnable) = scheduler(Duration::from_millis(100));

        assert!(scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[0; 10])), Status::NO_FLAGS));
        assert!(scheduler.schedule_job());
        assert!(scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[0; 20])), Status::NO_FLAGS));
        assert!(scheduler.schedule_job());
        assert!(scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[0; 30])), Status::IS_LAST));

        assert_eq!(executor.pending(), 1);
        assert_eq!(factory.live_buffers(), 1);
        executor.run_all();

        assert_eq!(runnable.runs(), vec![(30, Status::IS_LAST)]);
        assert_eq!(factory.live_buffers(), 0);
    }

    #[test]
    fn schedule_within_interval_is_delayed() {
        let factory = HeapBufferFactory::new();
        let (scheduler, executor, runnable) = scheduler(Duration::from_secs(5));

        scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[1; 4])), Status::NO_FLAGS);
        scheduler.schedule_job();
        executor.run_all();

        scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[2; 8])), Status::IS_LAST);
        scheduler.schedule_job();

        let delays = executor.pending_delays();
        assert_eq!(delays.len(), 1);
        assert!(delays[0] > Duration::from_secs(4));

        executor.run_all();
        assert_eq!(runnable.runs().len(), 2);
    }

    #[test]
    fn schedule_while_running_reenqueues_after_finish() {
        let factory = HeapBufferFactory::new();
        let executor = Arc::new(ManualExecutor::default());

        struct ReentrantRunnable {
            scheduler: StdMutex<Option<Arc<JobScheduler>>>,
            next: StdMutex<Option<EncodedImage>>,
            runs: StdMutex<usize>,
        }

        impl JobRunnable for ReentrantRunnable {
            fn run(&self, _job: ScheduledJob) {
                *self.runs.lock().expect("runs lock") += 1;
                let scheduler = self.scheduler.lock().expect("scheduler lock").clone();
                if let (Some(scheduler), Some(next)) =
                    (scheduler, self.next.lock().expect("next lock").take())
                {
                    assert!(scheduler.update_job(next, Status::IS_LAST));
                    assert!(scheduler.schedule_job());
                }
            }
        }

        let runnable = Arc::new(ReentrantRunnable {
            scheduler: StdMutex::new(None),
            next: StdMutex::new(Some(EncodedImage::new(factory.new_byte_buffer(&[9; 3])))),
            runs: StdMutex::new(0),
        });
        let scheduler = JobScheduler::new(executor.clone(), runnable.clone(), Duration::from_millis(100));
        *runnable.scheduler.lock().expect("scheduler lock") = Some(scheduler.clone());

        scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[1; 3])), Status::NO_FLAGS);
        scheduler.schedule_job();
        assert!(executor.run_next());

        let delays = executor.pending_delays();
        assert_eq!(delays, vec![Duration::from_millis(100)]);
        executor.run_all();
        assert_eq!(*runnable.runs.lock().expect("runs lock"), 2);

        *runnable.scheduler.lock().expect("scheduler lock") = None;
        assert_eq!(factory.live_buffers(), 0);
    }

    #[test]
    fn clear_wins_over_queued_execution() {
        let factory = HeapBufferFactory::new();
        let (scheduler, executor, runnable) = scheduler(Duration::from_millis(100));

        scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[1; 4])), Status::IS_LAST);
        scheduler.schedule_job();
        scheduler.clear_job();
        scheduler.clear_job();
        assert_eq!(factory.live_buffers(), 0);

        assert!(!scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[2; 4])), Status::IS_LAST));
        assert_eq!(factory.live_buffers(), 0);
        assert!(!scheduler.schedule_job());

        executor.run_all();
        assert!(runnable.runs().is_empty());
        assert!(scheduler.is_cleared());
    }

    #[test]
    fn closed_intermediate_snapshot_is_not_processed() {
        let factory = HeapBufferFactory::new();
        let (scheduler, _, _) = scheduler(Duration::from_millis(100));
        let mut image = EncodedImage::new(factory.new_byte_buffer(&[1; 4]));
        image.close();
        assert!(!scheduler.update_job(image, Status::NO_FLAGS));
    }

    #[test]
    fn queued_time_is_measured_at_dispatch() {
        let factory = HeapBufferFactory::new();
        let (scheduler, executor, _) = scheduler(Duration::from_millis(100));
        assert_eq!(scheduler.queued_time(), Duration::ZERO);

        scheduler.update_job(EncodedImage::new(factory.new_byte_buffer(&[1; 4])), Status::IS_LAST);
        scheduler.schedule_job();
        std::thread::sleep(Duration::from_millis(15));
        executor.run_all();
        assert!(scheduler.queued_time() >= Duration::from_millis(15));
    }
}
