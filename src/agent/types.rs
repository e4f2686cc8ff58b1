//! Agent 数据模型
//!
//! `Agent` 在注册时创建一次；之后只有所属的 Agent 进程会修改 `scheduled_workflows`、
//! `cognition_state` 与 `memory`，外部只能看到它发布的快照。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::schedule::add_schedule;
use crate::cognition::{CognitionLimits, CognitionState};
use crate::core::AgentError;

pub type AgentId = String;

/// 协作协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Ask,
    Tell,
    Delegate,
    RequestReview,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Ask, Protocol::Tell, Protocol::Delegate, Protocol::RequestReview];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ask => "ask",
            Protocol::Tell => "tell",
            Protocol::Delegate => "delegate",
            Protocol::RequestReview => "request_review",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 协作配置；默认不允许任何协作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollaborationConfig {
    pub can_delegate: bool,
    pub can_request_help: bool,
    pub trusted_peers: Vec<AgentId>,
    pub allowed_protocols: Vec<Protocol>,
}

/// 推理后端设置（对运行时不透明，只交给规划器）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

/// 记忆条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    /// signal / cycle / schedule ...
    pub kind: String,
    pub content: Value,
}

/// 一个 cron 计划：到点时运行同名工作流（没有则直接调用同名处理器）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWorkflow {
    pub handler: String,
    pub cron: String,
    /// 作为工作流输入 / 处理器参数
    #[serde(default)]
    pub opts: Value,
}

/// 外部投递给 Agent 的信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: String,
    pub payload: Value,
}

impl Signal {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub goal: String,
    pub available_handlers: Vec<String>,
    pub available_workflows: Vec<String>,
    /// Agent 关注的数据源名称，写入规划 prompt
    pub data_lenses: Vec<String>,
    pub llm_config: LlmConfig,
    pub memory: Vec<MemoryEntry>,
    pub scheduled_workflows: Vec<ScheduledWorkflow>,
    pub cognition_interval_ms: u64,
    pub cognition_state: CognitionState,
    pub cognition_limits: CognitionLimits,
    pub collaboration: CollaborationConfig,
}

impl Agent {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: format!("agent_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            goal: goal.into(),
            available_handlers: Vec::new(),
            available_workflows: Vec::new(),
            data_lenses: Vec::new(),
            llm_config: LlmConfig::default(),
            memory: Vec::new(),
            scheduled_workflows: Vec::new(),
            cognition_interval_ms: 60_000,
            cognition_state: CognitionState::new(),
            cognition_limits: CognitionLimits::default(),
            collaboration: CollaborationConfig::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_handlers<S: Into<String>>(mut self, handlers: impl IntoIterator<Item = S>) -> Self {
        self.available_handlers = handlers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workflows<S: Into<String>>(mut self, workflows: impl IntoIterator<Item = S>) -> Self {
        self.available_workflows = workflows.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_lenses<S: Into<String>>(mut self, lenses: impl IntoIterator<Item = S>) -> Self {
        self.data_lenses = lenses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_llm_config(mut self, config: LlmConfig) -> Self {
        self.llm_config = config;
        self
    }

    pub fn with_cognition_interval(mut self, interval_ms: u64) -> Self {
        self.cognition_interval_ms = interval_ms;
        self
    }

    pub fn with_limits(mut self, limits: CognitionLimits) -> Self {
        self.cognition_limits = limits;
        self
    }

    pub fn with_collaboration(mut self, config: CollaborationConfig) -> Self {
        self.collaboration = config;
        self
    }

    /// 与运行期 Schedule 相同：校验 cron 后插到最前面
    pub fn with_schedule(mut self, entry: ScheduledWorkflow) -> Result<Self, AgentError> {
        add_schedule(&mut self.scheduled_workflows, entry)?;
        Ok(self)
    }

    /// 只有 available_workflows 中列出的工作流可以被该 Agent 运行
    pub fn ensure_workflow(&self, workflow: &str) -> Result<(), AgentError> {
        if self.available_workflows.iter().any(|w| w == workflow) {
            Ok(())
        } else {
            Err(AgentError::WorkflowNotAvailable {
                agent: self.id.clone(),
                workflow: workflow.to_string(),
            })
        }
    }

    /// 追加记忆；超过上限时丢弃最旧的
    pub fn remember(&mut self, kind: impl Into<String>, content: Value, max_entries: usize) {
        self.memory.push(MemoryEntry {
            timestamp: Utc::now(),
            kind: kind.into(),
            content,
        });
        let overflow = self.memory.len().saturating_sub(max_entries);
        self.memory.drain(..overflow);
    }
}
