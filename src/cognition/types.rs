//! 认知循环（Reflection）数据类型
//!
//! `CognitionState` 只由 `CognitionEngine::cycle` / `learn` 产生新值，
//! 由唯一的 Agent 进程持有，不会被并发修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentSection;
use crate::workflow::ErrorRecord;

/// 认知状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CognitionPhase {
    #[default]
    Idle,
    Running,
}

/// 单个动作的执行结果；超时与 panic 也会转成这里的 error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub handler: String,
    pub output: Option<Value>,
    pub error: Option<ErrorRecord>,
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 一轮认知循环的历史记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub actions: Vec<ActionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CognitionMetrics {
    pub total_cycles: u64,
    pub total_actions: u64,
    /// 历史中成功动作占比（learn 时重算）
    pub learning_rate: f64,
}

/// 认知状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitionState {
    pub id: String,
    pub state: CognitionPhase,
    pub last_cycle_time: Option<DateTime<Utc>>,
    /// 去重且有上限
    pub patterns: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub metrics: CognitionMetrics,
}

impl CognitionState {
    pub fn new() -> Self {
        Self {
            id: format!("reflection_{}", uuid::Uuid::new_v4()),
            state: CognitionPhase::Idle,
            last_cycle_time: None,
            patterns: Vec::new(),
            history: Vec::new(),
            metrics: CognitionMetrics::default(),
        }
    }
}

impl Default for CognitionState {
    fn default() -> Self {
        Self::new()
    }
}

/// 每轮认知的执行上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CognitionLimits {
    pub max_actions_per_cycle: usize,
    pub max_parallel_actions: usize,
    pub action_timeout_ms: u64,
}

impl Default for CognitionLimits {
    fn default() -> Self {
        Self::from_config(&AgentSection::default())
    }
}

impl CognitionLimits {
    pub fn from_config(section: &AgentSection) -> Self {
        Self {
            max_actions_per_cycle: section.max_actions_per_cycle,
            max_parallel_actions: section.max_parallel_actions,
            action_timeout_ms: section.action_timeout_ms,
        }
    }
}

/// 规划出的一个动作：处理器名 + 参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub handler: String,
    #[serde(default)]
    pub params: Value,
}

impl PlannedAction {
    pub fn new(handler: impl Into<String>, params: Value) -> Self {
        Self {
            handler: handler.into(),
            params,
        }
    }
}

/// 规划器输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CyclePlan {
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
    #[serde(default)]
    pub summary: Option<String>,
    /// 若给出则更新 Agent 的认知间隔
    #[serde(default)]
    pub next_interval_ms: Option<u64>,
}
