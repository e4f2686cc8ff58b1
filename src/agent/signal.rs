//! 信号处理：把外部信号翻译成要异步执行的动作
//!
//! 处理器返回的动作由 Agent 进程以分离任务启动，结果不会回传给信号发送方；
//! 返回 Err 只记日志，进程继续运行。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::types::{Agent, Signal};
use crate::cognition::PlannedAction;

/// 信号处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    Actions(Vec<PlannedAction>),
    Ignore,
}

#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle_signal(&self, agent: &Agent, signal: &Signal) -> Result<SignalOutcome, String>;
}

/// 忽略所有信号
#[derive(Debug, Default)]
pub struct IgnoreSignals;

#[async_trait]
impl SignalHandler for IgnoreSignals {
    async fn handle_signal(&self, _agent: &Agent, _signal: &Signal) -> Result<SignalOutcome, String> {
        Ok(SignalOutcome::Ignore)
    }
}

/// 按信号类型路由到处理器，信号 payload 作为参数；未配置的类型被忽略
#[derive(Debug, Default, Clone)]
pub struct SignalRoutes {
    routes: HashMap<String, String>,
}

impl SignalRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, kind: impl Into<String>, handler: impl Into<String>) -> Self {
        self.routes.insert(kind.into(), handler.into());
        self
    }
}

#[async_trait]
impl SignalHandler for SignalRoutes {
    async fn handle_signal(&self, _agent: &Agent, signal: &Signal) -> Result<SignalOutcome, String> {
        Ok(match self.routes.get(&signal.kind) {
            Some(handler) => SignalOutcome::Actions(vec![PlannedAction::new(handler.clone(), signal.payload.clone())]),
            None => SignalOutcome::Ignore,
        })
    }
}

/// 闭包形式的信号处理器
pub struct FnSignalHandler<F>(F);

#[async_trait]
impl<F> SignalHandler for FnSignalHandler<F>
where
    F: Fn(&Agent, &Signal) -> Result<SignalOutcome, String> + Send + Sync,
{
    async fn handle_signal(&self, agent: &Agent, signal: &Signal) -> Result<SignalOutcome, String> {
        (self.0)(agent, signal)
    }
}

pub fn signal_fn<F>(f: F) -> Arc<dyn SignalHandler>
where
    F: Fn(&Agent, &Signal) -> Result<SignalOutcome, String> + Send + Sync + 'static,
{
    Arc::new(FnSignalHandler(f))
}
