//! 处理器执行器
//!
//! 按名查找处理器，在独立任务中以硬超时调用；超时只中止这一次调用。
//! 调用方丢弃 `invoke` 的 future（例如工作流整体超时）时，处理器任务随之中止。
//! 处理器返回 Err、超时、panic 分别映射为 WorkflowError::Handler / Timeout / HandlerPanicked，
//! 每次调用输出一条结构化审计日志（JSON）。

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::timeout;

use crate::core::WorkflowError;
use crate::handlers::HandlerRegistry;

/// 处理器执行器：持有注册表，可在多个工作流 / Agent 间共享
#[derive(Clone)]
pub struct HandlerExecutor {
    registry: Arc<HandlerRegistry>,
}

impl HandlerExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// 调用处理器；未注册的名字直接返回 UnknownHandler（不计入审计）
    pub async fn invoke(
        &self,
        handler_name: &str,
        input: Value,
        limit: Duration,
    ) -> Result<Value, WorkflowError> {
        let handler = self
            .registry
            .get(handler_name)
            .ok_or_else(|| WorkflowError::UnknownHandler(handler_name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&input);
        let mut task = tokio::spawn(async move { handler.handle(input).await });
        let _guard = AbortOnDrop(task.abort_handle());

        let result = match timeout(limit, &mut task).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(WorkflowError::Handler(e)),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(WorkflowError::HandlerPanicked(panic_message(join_err.into_panic())))
            }
            Ok(Err(join_err)) => Err(WorkflowError::Handler(join_err.to_string())),
            Err(_) => {
                task.abort();
                Err(WorkflowError::Timeout(limit.as_millis() as u64))
            }
        };

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(WorkflowError::Timeout(_)) => (false, "timeout"),
            Err(WorkflowError::HandlerPanicked(_)) => (false, "panic"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "handler_audit",
            "handler": handler_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "handler");

        result
    }
}

/// 离开作用域时中止处理器任务；任务已结束时无效果
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
