//! 步骤执行器
//!
//! 单个步骤：带硬超时调用处理器，按固定间隔重试，重试耗尽后再交给 fallback。
//! 校验类错误（如未注册的处理器）不重试，也不进入 fallback。

use std::time::Duration;

use serde_json::Value;

use crate::core::WorkflowError;
use crate::handlers::HandlerExecutor;
use crate::workflow::context::RunContext;
use crate::workflow::types::{FallbackDecision, StepSpec};

/// 步骤默认值（来自 [workflow] 配置）
#[derive(Debug, Clone, Copy)]
pub struct StepDefaults {
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

/// 步骤执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepSuccess {
    pub output: Value,
    /// 实际调用处理器的次数
    pub attempts: u32,
    /// 输出是否来自 fallback 的 Continue
    pub recovered: bool,
}

#[derive(Clone)]
pub struct StepExecutor {
    handlers: HandlerExecutor,
    defaults: StepDefaults,
}

impl StepExecutor {
    pub fn new(handlers: HandlerExecutor, defaults: StepDefaults) -> Self {
        Self { handlers, defaults }
    }

    pub async fn run_step(
        &self,
        spec: &StepSpec,
        input: Value,
        ctx: &RunContext,
    ) -> Result<StepSuccess, WorkflowError> {
        let opts = &spec.options;
        let limit = opts.timeout.unwrap_or(self.defaults.timeout);
        let backoff = opts.retry_backoff.unwrap_or(self.defaults.retry_backoff);
        let max_attempts = opts.retries + 1;

        let mut attempts = 0;
        let error = loop {
            attempts += 1;
            match self.handlers.invoke(&spec.handler, input.clone(), limit).await {
                Ok(output) => {
                    return Ok(StepSuccess {
                        output,
                        attempts,
                        recovered: false,
                    })
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts >= max_attempts => break e,
                Err(e) => {
                    tracing::debug!(
                        step = %spec.id,
                        attempt = attempts,
                        error = %e,
                        "step attempt failed, retrying in {} ms",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        let Some(fallback) = &opts.fallback else {
            return Err(error);
        };

        match fallback.recover(&error, ctx).await {
            FallbackDecision::Continue(output) => {
                tracing::info!(step = %spec.id, error = %error, "fallback continued with replacement output");
                Ok(StepSuccess {
                    output,
                    attempts,
                    recovered: true,
                })
            }
            FallbackDecision::Stop(message) => {
                tracing::warn!(step = %spec.id, error = %error, "fallback stopped the run: {}", message);
                Err(WorkflowError::FallbackStop(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{ActionHandler, HandlerRegistry};
    use crate::workflow::types::fallback_fn;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// 前 n 次失败，之后成功
    struct Flaky {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ActionHandler for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "fails a few times"
        }
        async fn handle(&self, _input: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(format!("failure #{}", n + 1))
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn executor(fail_times: u32) -> (StepExecutor, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(Flaky {
            fail_times,
            calls: Arc::clone(&calls),
        });
        let defaults = StepDefaults {
            timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(1),
        };
        (
            StepExecutor::new(HandlerExecutor::new(Arc::new(registry)), defaults),
            calls,
        )
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (exec, calls) = executor(2);
        let spec = StepSpec::new("s", "flaky").retries(2);
        let ok = exec.run_step(&spec, json!({}), &RunContext::default()).await.unwrap();
        assert_eq!(ok.attempts, 3);
        assert!(!ok.recovered);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_without_fallback_fails() {
        let (exec, calls) = executor(10);
        let spec = StepSpec::new("s", "flaky").retries(1);
        let err = exec.run_step(&spec, json!({}), &RunContext::default()).await.unwrap_err();
        assert_eq!(err, WorkflowError::Handler("failure #2".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_consulted_after_retries() {
        let (exec, calls) = executor(10);
        let spec = StepSpec::new("s", "flaky")
            .retries(2)
            .fallback(fallback_fn(|_, _| FallbackDecision::Continue(json!({"retried": true}))));
        let ok = exec.run_step(&spec, json!({}), &RunContext::default()).await.unwrap();
        assert!(ok.recovered);
        assert_eq!(ok.output, json!({"retried": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_handler_skips_retry_and_fallback() {
        let (exec, _) = executor(0);
        let spec = StepSpec::new("s", "missing")
            .retries(3)
            .fallback(fallback_fn(|_, _| FallbackDecision::Continue(json!(null))));
        let err = exec.run_step(&spec, json!({}), &RunContext::default()).await.unwrap_err();
        assert_eq!(err, WorkflowError::UnknownHandler("missing".into()));
    }
}
