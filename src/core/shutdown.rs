//! 进程级关闭
//!
//! Ctrl+C / SIGTERM 取消同一个 token；`run_with_graceful_shutdown` 随后按注册顺序执行清理任务，
//! 每个任务单独计时（`[app] shutdown_timeout_secs`）。只结束整个程序，不会取消进行中的工作流。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CtrlC,
    Terminate,
    /// 被嵌入方主动调用 `shutdown`
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::CtrlC => "ctrl_c",
            ShutdownReason::Terminate => "sigterm",
            ShutdownReason::Requested => "requested",
        })
    }
}

/// 关闭信号：一个取消 token 加上首个触发原因
pub struct ShutdownManager {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: watch::Sender::new(None),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 只记录第一次触发的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.reason.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::CtrlC);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        manager.shutdown(ShutdownReason::Terminate);
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self) -> anyhow::Result<()>;
}

pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&mut self, task: impl ShutdownCleanup + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// 逐个执行；失败或超时只记录日志，不影响后续任务
    pub async fn run_cleanup(&self) {
        for task in &self.tasks {
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!(task = task.name(), "cleanup done"),
                Ok(Err(e)) => tracing::warn!(task = task.name(), error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(
                    task = task.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "cleanup timed out"
                ),
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 停止监管者下的全部 Agent
pub struct StopAgents(pub Arc<AgentSupervisor>);

#[async_trait]
impl ShutdownCleanup for StopAgents {
    fn name(&self) -> &'static str {
        "stop_agents"
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        let running = self.0.list().await.len();
        self.0.stop_all().await;
        tracing::info!(agents = running, "all agents stopped");
        Ok(())
    }
}

/// 运行 `app` 直到它结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F>(manager: Arc<ShutdownManager>, app: F, coordinator: ShutdownCoordinator)
where
    F: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("application finished"),
        _ = manager.wait() => {
            let reason = manager.reason().unwrap_or(ShutdownReason::Requested);
            tracing::info!(%reason, "shutting down");
        }
    }

    coordinator.run_cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert_eq!(manager.reason(), None);

        manager.shutdown(ShutdownReason::Terminate);
        manager.shutdown(ShutdownReason::CtrlC);
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::Terminate));
    }

    struct Count(Arc<AtomicU32>);

    #[async_trait]
    impl ShutdownCleanup for Count {
        fn name(&self) -> &'static str {
            "count"
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Hang;

    #[async_trait]
    impl ShutdownCleanup for Hang {
        fn name(&self) -> &'static str {
            "hang"
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut coordinator = ShutdownCoordinator::new().with_timeout(Duration::from_millis(20));
        coordinator.register(Hang);
        coordinator.register(Count(Arc::clone(&calls)));

        run_with_graceful_shutdown(Arc::new(ShutdownManager::new()), async {}, coordinator).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_requested_shutdown_interrupts_app() {
        let manager = Arc::new(ShutdownManager::new());
        let calls = Arc::new(AtomicU32::new(0));
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(Count(Arc::clone(&calls)));

        manager.shutdown(ShutdownReason::Requested);
        run_with_graceful_shutdown(Arc::clone(&manager), std::future::pending::<()>(), coordinator).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
