//! 分离任务（fire-and-forget）
//!
//! Agent 进程发起的定时工作流、信号动作都通过 `TaskScheduler::detach` 启动：
//! 任务独立运行，结果被丢弃，错误只记录日志并计数，不回传给发起方。

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;

/// 任务类型
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    /// cron 触发的工作流
    ScheduledWorkflow,
    /// 信号处理器产生的动作
    SignalAction,
}

/// 任务 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// 分离任务调度器：可 clone，多个 clone 共享计数
#[derive(Clone, Default)]
pub struct TaskScheduler {
    active: Arc<Mutex<HashMap<TaskId, TaskKind>>>,
    counters: Arc<Counters>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动一个分离任务；返回值仅用于日志关联，调用方不会等待其结果
    pub fn detach<F, T, E>(&self, kind: TaskKind, label: impl Into<String>, fut: F) -> TaskId
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let id = TaskId::new();
        let label = label.into();
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, kind);
        }

        let active = Arc::clone(&self.active);
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            // panic 也计为失败，并且一定从 active 中移除
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(_)) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(task = ?id, ?kind, label = %label, "detached task finished");
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(task = ?id, ?kind, label = %label, error = %e, "detached task failed (discarded)");
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task = ?id, ?kind, label = %label, "detached task panicked (discarded)");
                }
            }
            if let Ok(mut active) = active.lock() {
                active.remove(&id);
            }
        });
        id
    }

    /// 当前仍在运行的分离任务数
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn active_of(&self, kind: TaskKind) -> usize {
        self.active
            .lock()
            .map(|a| a.values().filter(|k| **k == kind).count())
            .unwrap_or(0)
    }

    pub fn succeeded(&self) -> u64 {
        self.counters.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn settle(scheduler: &TaskScheduler) {
        for _ in 0..50 {
            if scheduler.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_detached_failure_is_swallowed_and_counted() {
        let scheduler = TaskScheduler::new();
        scheduler.detach(TaskKind::SignalAction, "boom", async { Err::<(), _>("boom") });
        scheduler.detach(TaskKind::SignalAction, "ok", async { Ok::<_, String>(1) });
        settle(&scheduler).await;

        assert_eq!(scheduler.failed(), 1);
        assert_eq!(scheduler.succeeded(), 1);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_counts_as_failed_and_leaves_active() {
        let scheduler = TaskScheduler::new();
        let explode = true;
        scheduler.detach(TaskKind::ScheduledWorkflow, "panics", async move {
            if explode {
                panic!("fallback closure blew up");
            }
            Ok::<(), String>(())
        });
        settle(&scheduler).await;

        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.failed(), 1);
        assert_eq!(scheduler.succeeded(), 0);
    }

    #[tokio::test]
    async fn test_active_count_by_kind() {
        let scheduler = TaskScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        scheduler.detach(TaskKind::ScheduledWorkflow, "wait", async move {
            rx.await.map_err(|e| e.to_string())
        });

        assert_eq!(scheduler.active_of(TaskKind::ScheduledWorkflow), 1);
        assert_eq!(scheduler.active_of(TaskKind::SignalAction), 0);

        let _ = tx.send(());
        settle(&scheduler).await;
        assert_eq!(scheduler.active_count(), 0);
    }
}
