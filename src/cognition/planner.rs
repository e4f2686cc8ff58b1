//! Planner：为一轮认知产生候选动作列表
//!
//! `LlmPlanner` 把目标、可用处理器、数据源、已学到的模式与上下文拼成 prompt，
//! 按 Agent 的 `llm_config` 选择模型与温度，
//! 再从回复中提取 JSON（```json 代码块或首个 `{` 到末个 `}`）解析为 `CyclePlan`。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::Agent;
use crate::cognition::types::{CognitionState, CyclePlan, PlannedAction};
use crate::core::CognitionError;
use crate::handlers::{action_plan_schema_json, HandlerRegistry};
use crate::llm::{CompletionOptions, LlmClient, Message};

/// 规划器 trait
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        agent: &Agent,
        state: &CognitionState,
        context: &Value,
    ) -> Result<CyclePlan, CognitionError>;
}

/// 固定计划（测试与演示用）
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    plan: CyclePlan,
}

impl StaticPlanner {
    pub fn new(actions: Vec<PlannedAction>) -> Self {
        Self {
            plan: CyclePlan {
                actions,
                summary: Some("static plan".to_string()),
                next_interval_ms: None,
            },
        }
    }

    pub fn with_plan(plan: CyclePlan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _: &Agent, _: &CognitionState, _: &Value) -> Result<CyclePlan, CognitionError> {
        Ok(self.plan.clone())
    }
}

/// 最多放入 prompt 的模式条数
const PROMPT_PATTERNS: usize = 20;

/// 基于 LLM 的规划器
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<HandlerRegistry>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<HandlerRegistry>) -> Self {
        Self { llm, registry }
    }

    fn system_prompt(&self, agent: &Agent) -> String {
        let mut prompt = agent
            .llm_config
            .system_prompt
            .clone()
            .unwrap_or_else(|| "You are an autonomous agent. Decide which actions to take next.".to_string());
        prompt.push_str("\n\nAvailable handlers:\n");
        prompt.push_str(&self.registry.to_schema_json(&agent.available_handlers));
        prompt.push_str("\n\nReply with a single JSON object matching this schema:\n");
        prompt.push_str(&action_plan_schema_json());
        prompt
    }

    fn user_prompt(agent: &Agent, state: &CognitionState, context: &Value) -> String {
        let skip = state.patterns.len().saturating_sub(PROMPT_PATTERNS);
        let patterns = state.patterns[skip..].join(", ");
        format!(
            "Goal: {}\nData lenses: [{}]\nLearned patterns: [{}]\nCycles so far: {}\nContext: {}",
            agent.goal,
            agent.data_lenses.join(", "),
            patterns,
            state.metrics.total_cycles,
            context
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        agent: &Agent,
        state: &CognitionState,
        context: &Value,
    ) -> Result<CyclePlan, CognitionError> {
        let messages = [
            Message::system(self.system_prompt(agent)),
            Message::user(Self::user_prompt(agent, state, context)),
        ];
        let options = CompletionOptions {
            model: agent.llm_config.model.clone(),
            temperature: agent.llm_config.temperature,
        };
        let reply = self
            .llm
            .complete(&messages, &options)
            .await
            .map_err(CognitionError::Planner)?;
        let (_, _, total_tokens) = self.llm.token_usage();
        tracing::debug!(agent = %agent.id, total_tokens, "planner reply received");
        let mut plan = parse_plan(&reply)?;

        // 只保留 Agent 目录中的处理器（目录为空表示不限制）
        if !agent.available_handlers.is_empty() {
            plan.actions.retain(|action| {
                let known = agent.available_handlers.contains(&action.handler);
                if !known {
                    tracing::warn!(agent = %agent.id, handler = %action.handler, "planner proposed handler outside catalog, dropped");
                }
                known
            });
        }
        Ok(plan)
    }
}

/// 从 LLM 回复中提取并解析计划
pub fn parse_plan(output: &str) -> Result<CyclePlan, CognitionError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => return Err(CognitionError::InvalidPlan(format!("no JSON object in reply: {}", trimmed))),
        }
    };

    serde_json::from_str(json_str).map_err(|e| CognitionError::InvalidPlan(format!("{}: {}", e, json_str)))
}
