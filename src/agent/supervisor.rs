//! Agent 监管者：创建、查找、列出、终止 Agent 进程
//!
//! 一对一重启：进程 panic 后用最近发布的快照启动新进程，命令队列与句柄保持不变，
//! 瞬时上下文丢失。`restart_window_secs` 内崩溃超过 `max_restarts` 次则放弃并移除该 Agent。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agent::collaboration::{CollaborationGate, ProtocolHandler};
use crate::agent::process::{AgentProcess, AgentRuntime, CommandQueue, ProcessHandle};
use crate::agent::signal::{IgnoreSignals, SignalHandler};
use crate::agent::types::{Agent, AgentId, Protocol, Signal};
use crate::config::SupervisorSection;
use crate::core::{AgentError, CollaborationError};

struct Entry {
    handle: ProcessHandle,
    stopping: Arc<AtomicBool>,
    restarts: Arc<AtomicU32>,
}

type Registry = Arc<RwLock<HashMap<AgentId, Entry>>>;

pub struct AgentSupervisor {
    runtime: AgentRuntime,
    settings: SupervisorSection,
    agents: Registry,
    gate: CollaborationGate,
    default_signal_handler: Arc<dyn SignalHandler>,
}

impl AgentSupervisor {
    /// `tell` 默认把 payload 作为信号投递给目标进程，其余协议为占位实现
    pub fn new(runtime: AgentRuntime, settings: SupervisorSection) -> Self {
        let agents: Registry = Arc::new(RwLock::new(HashMap::new()));
        let gate = CollaborationGate::new().with_handler(
            Protocol::Tell,
            Arc::new(TellProtocol {
                agents: Arc::clone(&agents),
            }),
        );
        Self {
            runtime,
            settings,
            agents,
            gate,
            default_signal_handler: Arc::new(IgnoreSignals),
        }
    }

    pub fn with_gate(mut self, gate: CollaborationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_signal_handler(mut self, handler: Arc<dyn SignalHandler>) -> Self {
        self.default_signal_handler = handler;
        self
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub async fn start(&self, agent: Agent) -> Result<ProcessHandle, AgentError> {
        let handler = Arc::clone(&self.default_signal_handler);
        self.start_with_signal_handler(agent, handler).await
    }

    pub async fn start_with_signal_handler(
        &self,
        agent: Agent,
        signal_handler: Arc<dyn SignalHandler>,
    ) -> Result<ProcessHandle, AgentError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(AgentError::AlreadyRunning(agent.id));
        }

        let id = agent.id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(agent.clone());
        let snap_tx = Arc::new(snap_tx);
        let queue: CommandQueue = Arc::new(Mutex::new(rx));
        let handle = ProcessHandle::new(id.clone(), tx, snap_rx);
        let stopping = Arc::new(AtomicBool::new(false));
        let restarts = Arc::new(AtomicU32::new(0));

        let process = AgentProcess::new(agent, self.runtime.clone(), Arc::clone(&signal_handler), Arc::clone(&snap_tx));
        let join = tokio::spawn(process.run(Arc::clone(&queue)));

        let monitor = Monitor {
            id: id.clone(),
            runtime: self.runtime.clone(),
            signal_handler,
            snapshot: snap_tx,
            queue,
            stopping: Arc::clone(&stopping),
            restarts: Arc::clone(&restarts),
            agents: Arc::clone(&self.agents),
            max_restarts: self.settings.max_restarts,
            window: Duration::from_secs(self.settings.restart_window_secs),
        };
        tokio::spawn(monitor.watch(join));

        agents.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                stopping,
                restarts,
            },
        );
        tracing::info!(agent = %id, "agent started");
        Ok(handle)
    }

    /// 终止进程；不存在时返回 NotFound
    pub async fn stop(&self, id: &str) -> Result<(), AgentError> {
        let entry = self
            .agents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        entry.stopping.store(true, Ordering::SeqCst);
        entry.handle.stop();
        tracing::info!(agent = %id, "agent stopped");
        Ok(())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<AgentId> = self.agents.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    pub async fn find(&self, id: &str) -> Result<ProcessHandle, AgentError> {
        self.agents
            .read()
            .await
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// 所有运行中 Agent 的最近快照（按 id 排序）
    pub async fn list(&self) -> Vec<Agent> {
        let mut snapshots: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .map(|entry| entry.handle.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// 某个 Agent 至今被重启的次数
    pub async fn restart_count(&self, id: &str) -> Result<u32, AgentError> {
        self.agents
            .read()
            .await
            .get(id)
            .map(|entry| entry.restarts.load(Ordering::SeqCst))
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    pub async fn collaborate(
        &self,
        source_id: &str,
        target_id: &str,
        protocol: Protocol,
        payload: Value,
    ) -> Result<Value, CollaborationError> {
        let source = self
            .find(source_id)
            .await
            .map_err(|_| CollaborationError::UnknownAgent(source_id.to_string()))?
            .snapshot();
        let target = self
            .find(target_id)
            .await
            .map_err(|_| CollaborationError::UnknownAgent(target_id.to_string()))?
            .snapshot();
        self.gate.collaborate(&source, &target, protocol, payload).await
    }
}

/// 监视单个 Agent 进程并按重启强度重启
struct Monitor {
    id: AgentId,
    runtime: AgentRuntime,
    signal_handler: Arc<dyn SignalHandler>,
    snapshot: Arc<watch::Sender<Agent>>,
    queue: CommandQueue,
    stopping: Arc<AtomicBool>,
    restarts: Arc<AtomicU32>,
    agents: Registry,
    max_restarts: u32,
    window: Duration,
}

impl Monitor {
    async fn watch(self, mut join: JoinHandle<()>) {
        let mut crashes: VecDeque<Instant> = VecDeque::new();
        loop {
            let err = match join.await {
                Ok(()) => return,
                Err(e) if e.is_cancelled() => return,
                Err(e) => e,
            };
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let now = Instant::now();
            crashes.push_back(now);
            while crashes.front().is_some_and(|t| now.duration_since(*t) > self.window) {
                crashes.pop_front();
            }
            if crashes.len() > self.max_restarts as usize {
                tracing::error!(agent = %self.id, crashes = crashes.len(), "agent crashed too often, giving up");
                self.agents.write().await.remove(&self.id);
                return;
            }

            self.restarts.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(agent = %self.id, error = %err, "agent process crashed, restarting from last snapshot");
            let agent = self.snapshot.borrow().clone();
            let process = AgentProcess::new(
                agent,
                self.runtime.clone(),
                Arc::clone(&self.signal_handler),
                Arc::clone(&self.snapshot),
            );
            join = tokio::spawn(process.run(Arc::clone(&self.queue)));
        }
    }
}

/// tell：以 `tell` 信号投递给目标
struct TellProtocol {
    agents: Registry,
}

#[async_trait]
impl ProtocolHandler for TellProtocol {
    async fn handle(&self, source: &Agent, target: &Agent, payload: Value) -> Result<Value, CollaborationError> {
        let handle = self
            .agents
            .read()
            .await
            .get(&target.id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| CollaborationError::UnknownAgent(target.id.clone()))?;
        handle
            .signal(Signal::new("tell", json!({"from": source.id, "payload": payload})))
            .map_err(|e| CollaborationError::Protocol(e.to_string()))?;
        Ok(json!({"delivered": true}))
    }
}
