//! Agent 运行时：数据模型、cron 计划、信号处理、单 Agent 进程、监管者与协作网关

pub mod collaboration;
pub mod process;
pub mod schedule;
pub mod signal;
pub mod supervisor;
pub mod types;

pub use collaboration::{CollaborationGate, NotImplementedProtocol, ProtocolHandler};
pub use process::{AgentCommand, AgentProcess, AgentRuntime, ProcessHandle};
pub use schedule::{due_workflows, matches_at, parse_cron};
pub use signal::{signal_fn, IgnoreSignals, SignalHandler, SignalOutcome, SignalRoutes};
pub use supervisor::AgentSupervisor;
pub use types::{
    Agent, AgentId, CollaborationConfig, LlmConfig, MemoryEntry, Protocol, ScheduledWorkflow, Signal,
};
