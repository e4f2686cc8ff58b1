//! Agent 进程：持有单个 Agent 状态的唯一工作任务
//!
//! 一个循环里用 `tokio::select!` 复用四类事件源：命令队列（Signal / Schedule / Unschedule / Snapshot / Stop）
//! 与三个定时器（认知、计划检查、学习）。所有事件依次处理，从不并发修改自身状态；
//! 计划触发的工作流与信号动作通过 `TaskScheduler::detach` 启动，结果被丢弃。
//! 每处理完一个事件就通过 watch 通道发布一次 `Agent` 快照。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{sleep_until, Instant};

use crate::agent::schedule::{add_schedule, due_workflows, remove_schedule};
use crate::agent::signal::{SignalHandler, SignalOutcome};
use crate::agent::types::{Agent, ScheduledWorkflow, Signal};
use crate::cognition::CognitionEngine;
use crate::config::AgentSection;
use crate::core::{AgentError, TaskKind, TaskScheduler};
use crate::handlers::HandlerExecutor;
use crate::workflow::{RunOptions, WorkflowCatalog, WorkflowEngine, WorkflowRun};

/// 发往 Agent 进程的命令
#[derive(Debug)]
pub enum AgentCommand {
    /// 即发即弃
    Signal(Signal),
    Schedule {
        entry: ScheduledWorkflow,
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
    Unschedule {
        handler: String,
        reply: oneshot::Sender<usize>,
    },
    Snapshot(oneshot::Sender<Agent>),
    Stop,
}

/// 所有 Agent 进程共享的服务
#[derive(Clone)]
pub struct AgentRuntime {
    pub handlers: HandlerExecutor,
    pub workflows: Arc<WorkflowCatalog>,
    pub engine: WorkflowEngine,
    pub cognition: Arc<CognitionEngine>,
    pub tasks: TaskScheduler,
    pub settings: AgentSection,
}

impl AgentRuntime {
    /// 以 Agent 身份按名运行目录中的工作流并等待结果；工作流须在 Agent 的 available_workflows 中
    pub async fn run_workflow(&self, agent: &Agent, name: &str, input: Value) -> Result<WorkflowRun, AgentError> {
        agent.ensure_workflow(name)?;
        let def = self.workflows.require(name)?;
        Ok(self.engine.run(&def, input, RunOptions::started_by(agent.id.clone())).await)
    }
}

/// 命令接收端；放在 Mutex 里以便重启后的新进程继续消费同一个队列
pub type CommandQueue = Arc<Mutex<mpsc::UnboundedReceiver<AgentCommand>>>;

pub struct AgentProcess {
    agent: Agent,
    /// 瞬时上下文，崩溃重启后丢失
    context: Map<String, Value>,
    runtime: AgentRuntime,
    signal_handler: Arc<dyn SignalHandler>,
    snapshot: Arc<watch::Sender<Agent>>,
}

impl AgentProcess {
    pub fn new(
        agent: Agent,
        runtime: AgentRuntime,
        signal_handler: Arc<dyn SignalHandler>,
        snapshot: Arc<watch::Sender<Agent>>,
    ) -> Self {
        Self {
            agent,
            context: Map::new(),
            runtime,
            signal_handler,
            snapshot,
        }
    }

    fn cognition_interval(&self) -> Duration {
        Duration::from_millis(self.agent.cognition_interval_ms.max(1))
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.agent.clone());
    }

    /// 主循环；收到 Stop 或队列关闭时正常返回
    pub async fn run(mut self, commands: CommandQueue) {
        let mut queue = commands.lock().await;
        let settings = self.runtime.settings.clone();
        tracing::info!(agent = %self.agent.id, name = %self.agent.name, "agent process started");
        self.publish();

        let mut next_cognition = Instant::now() + self.cognition_interval();
        let mut next_schedule = Instant::now() + settings.schedule_check_interval();
        let mut next_learn = Instant::now() + settings.learn_interval();

        loop {
            tokio::select! {
                cmd = queue.recv() => match cmd {
                    Some(AgentCommand::Stop) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },
                _ = sleep_until(next_cognition) => {
                    self.on_cognition_timer().await;
                    next_cognition = Instant::now() + self.cognition_interval();
                }
                _ = sleep_until(next_schedule) => {
                    self.on_schedule_check(Utc::now());
                    next_schedule = Instant::now() + settings.schedule_check_interval();
                }
                _ = sleep_until(next_learn) => {
                    self.on_learn_timer();
                    next_learn = Instant::now() + settings.learn_interval();
                }
            }
            self.publish();
        }

        tracing::info!(agent = %self.agent.id, "agent process stopped");
    }

    async fn on_command(&mut self, cmd: AgentCommand) {
        match cmd {
            AgentCommand::Signal(signal) => self.on_signal(signal).await,
            AgentCommand::Schedule { entry, reply } => {
                let summary = json!({"handler": entry.handler, "cron": entry.cron});
                let result = add_schedule(&mut self.agent.scheduled_workflows, entry);
                match &result {
                    Ok(()) => self.remember("schedule", summary),
                    Err(e) => tracing::warn!(agent = %self.agent.id, error = %e, "schedule rejected"),
                }
                let _ = reply.send(result);
            }
            AgentCommand::Unschedule { handler, reply } => {
                let removed = remove_schedule(&mut self.agent.scheduled_workflows, &handler);
                if removed > 0 {
                    self.remember("unschedule", json!({"handler": handler, "removed": removed}));
                }
                let _ = reply.send(removed);
            }
            AgentCommand::Snapshot(reply) => {
                let _ = reply.send(self.agent.clone());
            }
            AgentCommand::Stop => {}
        }
    }

    async fn on_cognition_timer(&mut self) {
        let context = Value::Object(self.context.clone());
        let state = self.agent.cognition_state.clone();

        match self.runtime.cognition.cycle(state, &self.agent, &context).await {
            Ok(report) => {
                self.agent.cognition_state = report.state;
                if let Some(interval) = report.next_interval_ms {
                    self.agent.cognition_interval_ms = interval.max(1);
                }
                let cycle_time = self
                    .agent
                    .cognition_state
                    .last_cycle_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                self.context.insert(
                    "lastCycleResults".to_string(),
                    serde_json::to_value(&report.results).unwrap_or(Value::Null),
                );
                self.context.insert("lastCycleTime".to_string(), Value::String(cycle_time));
                self.remember(
                    "cycle",
                    json!({"summary": report.summary, "actions": report.results.len()}),
                );
            }
            Err(failure) => {
                tracing::warn!(agent = %self.agent.id, error = %failure.error, "cognition cycle failed");
                self.agent.cognition_state = failure.state;
            }
        }
    }

    /// 启动所有在 `now` 到期的计划；不等待、不记录结果
    fn on_schedule_check(&mut self, now: DateTime<Utc>) {
        for entry in due_workflows(&self.agent.scheduled_workflows, now) {
            self.launch_scheduled(entry);
        }
    }

    fn launch_scheduled(&self, entry: ScheduledWorkflow) {
        let label = format!("{}:{}", self.agent.id, entry.handler);
        match self.runtime.workflows.get(&entry.handler) {
            Some(_) if self.agent.ensure_workflow(&entry.handler).is_err() => {
                tracing::warn!(agent = %self.agent.id, workflow = %entry.handler, "scheduled workflow not available to agent, skipped");
            }
            Some(def) => {
                let engine = self.runtime.engine.clone();
                let opts = RunOptions::started_by(self.agent.id.clone());
                tracing::info!(agent = %self.agent.id, workflow = %entry.handler, "scheduled workflow due");
                self.runtime.tasks.detach(TaskKind::ScheduledWorkflow, label, async move {
                    engine.run(&def, entry.opts, opts).await.result
                });
            }
            None => {
                let handlers = self.runtime.handlers.clone();
                let limit = Duration::from_millis(self.agent.cognition_limits.action_timeout_ms);
                tracing::info!(agent = %self.agent.id, handler = %entry.handler, "scheduled handler due");
                self.runtime.tasks.detach(TaskKind::ScheduledWorkflow, label, async move {
                    handlers.invoke(&entry.handler, entry.opts, limit).await
                });
            }
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        self.remember("signal", json!({"kind": signal.kind, "payload": signal.payload}));
        self.context.insert("lastSignal".to_string(), Value::String(signal.kind.clone()));

        let outcome = self.signal_handler.handle_signal(&self.agent, &signal).await;
        match outcome {
            Ok(SignalOutcome::Ignore) => {
                tracing::debug!(agent = %self.agent.id, kind = %signal.kind, "signal ignored");
            }
            Ok(SignalOutcome::Actions(actions)) => {
                let limit = Duration::from_millis(self.agent.cognition_limits.action_timeout_ms);
                for action in actions {
                    let handlers = self.runtime.handlers.clone();
                    let label = format!("{}:{}", self.agent.id, action.handler);
                    self.runtime.tasks.detach(TaskKind::SignalAction, label, async move {
                        handlers.invoke(&action.handler, action.params, limit).await
                    });
                }
            }
            Err(e) => {
                tracing::warn!(agent = %self.agent.id, kind = %signal.kind, error = %e, "signal handler failed");
            }
        }
    }

    fn on_learn_timer(&mut self) {
        let state = self.agent.cognition_state.clone();
        self.agent.cognition_state = self.runtime.cognition.learn(state);
    }

    fn remember(&mut self, kind: &str, content: Value) {
        let cap = self.runtime.settings.max_memory_entries;
        self.agent.remember(kind, content, cap);
    }
}

/// 调用方持有的进程句柄；重启后依然有效
#[derive(Clone)]
pub struct ProcessHandle {
    id: String,
    commands: mpsc::UnboundedSender<AgentCommand>,
    snapshot: watch::Receiver<Agent>,
}

impl ProcessHandle {
    pub fn new(id: String, commands: mpsc::UnboundedSender<AgentCommand>, snapshot: watch::Receiver<Agent>) -> Self {
        Self { id, commands, snapshot }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 最近发布的快照（不经过进程）
    pub fn snapshot(&self) -> Agent {
        self.snapshot.borrow().clone()
    }

    fn send(&self, cmd: AgentCommand) -> Result<(), AgentError> {
        self.commands
            .send(cmd)
            .map_err(|_| AgentError::ProcessUnavailable(self.id.clone()))
    }

    /// 投递信号；只要进程邮箱可用就返回 Ok，处理结果不回传
    pub fn signal(&self, signal: Signal) -> Result<(), AgentError> {
        self.send(AgentCommand::Signal(signal))
    }

    pub async fn schedule(&self, handler: impl Into<String>, cron: impl Into<String>, opts: Value) -> Result<(), AgentError> {
        let (reply, rx) = oneshot::channel();
        let entry = ScheduledWorkflow {
            handler: handler.into(),
            cron: cron.into(),
            opts,
        };
        self.send(AgentCommand::Schedule { entry, reply })?;
        rx.await
            .map_err(|_| AgentError::ProcessUnavailable(self.id.clone()))?
    }

    /// 删除同名计划，返回删除条数（不存在时为 0）
    pub async fn unschedule(&self, handler: impl Into<String>) -> Result<usize, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Unschedule {
            handler: handler.into(),
            reply,
        })?;
        rx.await.map_err(|_| AgentError::ProcessUnavailable(self.id.clone()))
    }

    /// 经由进程取得当前状态（排在已投递命令之后）
    pub async fn current(&self) -> Result<Agent, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Snapshot(reply))?;
        rx.await.map_err(|_| AgentError::ProcessUnavailable(self.id.clone()))
    }

    pub(crate) fn stop(&self) {
        let _ = self.commands.send(AgentCommand::Stop);
    }
}
