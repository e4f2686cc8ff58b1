//! 认知引擎：cycle（规划 + 有界并行执行）与 learn（把历史折叠为模式）
//!
//! 执行模型：截断到 max_actions_per_cycle，按 max_parallel_actions 分块，
//! 块与块之间有屏障，块内完全并行；单个动作的超时 / panic 只影响它自己。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;

use crate::agent::Agent;
use crate::cognition::planner::Planner;
use crate::cognition::types::*;
use crate::config::AgentSection;
use crate::core::CognitionError;
use crate::handlers::HandlerExecutor;
use crate::workflow::ErrorRecord;

/// 一轮成功的认知
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub state: CognitionState,
    pub results: Vec<ActionOutcome>,
    pub summary: String,
    pub next_interval_ms: Option<u64>,
}

/// 规划失败时仍返回推进过的状态
#[derive(Debug, Clone)]
pub struct CycleFailure {
    pub error: CognitionError,
    pub state: CognitionState,
}

pub struct CognitionEngine {
    planner: Arc<dyn Planner>,
    executor: HandlerExecutor,
    max_history: usize,
    max_patterns: usize,
}

impl CognitionEngine {
    pub fn new(planner: Arc<dyn Planner>, executor: HandlerExecutor) -> Self {
        let defaults = AgentSection::default();
        Self {
            planner,
            executor,
            max_history: defaults.max_history,
            max_patterns: defaults.max_patterns,
        }
    }

    /// 历史与模式上限（来自 [agent] 配置）
    pub fn with_bounds(mut self, max_history: usize, max_patterns: usize) -> Self {
        self.max_history = max_history.max(1);
        self.max_patterns = max_patterns.max(1);
        self
    }

    pub async fn cycle(
        &self,
        mut state: CognitionState,
        agent: &Agent,
        context: &Value,
    ) -> Result<CycleReport, CycleFailure> {
        state.state = CognitionPhase::Running;
        let plan = self.planner.plan(agent, &state, context).await;

        state.state = CognitionPhase::Idle;
        state.last_cycle_time = Some(Utc::now());
        state.metrics.total_cycles += 1;

        let plan = match plan {
            Ok(plan) => plan,
            Err(error) => {
                tracing::warn!(agent = %agent.id, error = %error, "cognition planning failed");
                return Err(CycleFailure { error, state });
            }
        };

        let limits = agent.cognition_limits;
        let mut actions = plan.actions;
        if actions.len() > limits.max_actions_per_cycle {
            tracing::debug!(
                agent = %agent.id,
                planned = actions.len(),
                limit = limits.max_actions_per_cycle,
                "truncating planned actions"
            );
            actions.truncate(limits.max_actions_per_cycle);
        }

        let results = self.execute(&actions, limits).await;
        let summary = plan
            .summary
            .unwrap_or_else(|| format!("executed {} action(s)", results.len()));

        state.metrics.total_actions += results.len() as u64;
        state.history.push(HistoryEntry {
            timestamp: Utc::now(),
            summary: summary.clone(),
            actions: results.clone(),
        });
        let overflow = state.history.len().saturating_sub(self.max_history);
        state.history.drain(..overflow);

        tracing::info!(
            agent = %agent.id,
            actions = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "cognition cycle completed"
        );

        Ok(CycleReport {
            state,
            results,
            summary,
            next_interval_ms: plan.next_interval_ms,
        })
    }

    async fn execute(&self, actions: &[PlannedAction], limits: CognitionLimits) -> Vec<ActionOutcome> {
        let limit = Duration::from_millis(limits.action_timeout_ms);
        let mut results = Vec::with_capacity(actions.len());

        for chunk in actions.chunks(limits.max_parallel_actions.max(1)) {
            let outcomes = join_all(chunk.iter().map(|action| async move {
                let result = self
                    .executor
                    .invoke(&action.handler, action.params.clone(), limit)
                    .await;
                ActionOutcome {
                    handler: action.handler.clone(),
                    output: result.as_ref().ok().cloned(),
                    error: result.as_ref().err().map(ErrorRecord::from),
                }
            }))
            .await;
            results.extend(outcomes);
        }
        results
    }

    /// 把历史折叠进模式并重算指标；历史为空时原样返回（phase 为 idle）
    pub fn learn(&self, mut state: CognitionState) -> CognitionState {
        state.state = CognitionPhase::Idle;
        if state.history.is_empty() {
            return state;
        }

        let mut ok = 0usize;
        let mut total = 0usize;
        for entry in &state.history {
            for action in &entry.actions {
                total += 1;
                let outcome = if action.is_ok() {
                    ok += 1;
                    "ok"
                } else {
                    "error"
                };
                for pattern in [
                    format!("action:{}", action.handler),
                    format!("outcome:{}:{}", action.handler, outcome),
                ] {
                    // 重新出现的模式移到末尾，上限裁剪时保留最近的
                    state.patterns.retain(|p| p != &pattern);
                    state.patterns.push(pattern);
                }
            }
        }

        let overflow = state.patterns.len().saturating_sub(self.max_patterns);
        state.patterns.drain(..overflow);
        state.metrics.learning_rate = if total == 0 { 0.0 } else { ok as f64 / total as f64 };

        tracing::debug!(patterns = state.patterns.len(), learning_rate = state.metrics.learning_rate, "learned from history");
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::planner::StaticPlanner;
    use crate::handlers::{ActionHandler, EchoHandler, HandlerRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录最大并发数
    struct Gauge {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActionHandler for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }
        fn description(&self) -> &str {
            "measures concurrency"
        }
        async fn handle(&self, _input: Value) -> Result<Value, String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"done": true}))
        }
    }

    struct Explodes;

    #[async_trait]
    impl ActionHandler for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn handle(&self, _input: Value) -> Result<Value, String> {
            panic!("boom")
        }
    }

    fn engine(actions: Vec<PlannedAction>) -> (CognitionEngine, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(EchoHandler);
        registry.register(Explodes);
        registry.register(Gauge {
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        });
        let engine = CognitionEngine::new(
            Arc::new(StaticPlanner::new(actions)),
            HandlerExecutor::new(Arc::new(registry)),
        );
        (engine, peak)
    }

    fn agent(limits: CognitionLimits) -> Agent {
        Agent::new("tester", "test").with_limits(limits)
    }

    #[tokio::test]
    async fn test_cycle_truncates_to_max_actions() {
        let actions = (0..3).map(|i| PlannedAction::new("echo", json!({"i": i}))).collect();
        let (engine, _) = engine(actions);
        let limits = CognitionLimits {
            max_actions_per_cycle: 1,
            max_parallel_actions: 2,
            action_timeout_ms: 1000,
        };

        let report = engine.cycle(CognitionState::new(), &agent(limits), &json!({})).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.state.metrics.total_actions, 1);
        assert_eq!(report.state.metrics.total_cycles, 1);
        assert!(report.state.last_cycle_time.is_some());
        assert_eq!(report.state.state, CognitionPhase::Idle);
    }

    #[tokio::test]
    async fn test_chunks_bound_parallelism() {
        let actions = (0..4).map(|_| PlannedAction::new("gauge", json!({}))).collect();
        let (engine, peak) = engine(actions);
        let limits = CognitionLimits {
            max_actions_per_cycle: 5,
            max_parallel_actions: 2,
            action_timeout_ms: 1000,
        };

        let report = engine.cycle(CognitionState::new(), &agent(limits), &json!({})).await.unwrap();
        assert_eq!(report.results.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_action_does_not_abort_cycle() {
        let (engine, _) = engine(vec![
            PlannedAction::new("explodes", json!({})),
            PlannedAction::new("echo", json!({"ok": 1})),
        ]);
        let report = engine
            .cycle(CognitionState::new(), &agent(CognitionLimits::default()), &json!({}))
            .await
            .unwrap();

        assert_eq!(report.results[0].error.as_ref().map(|e| e.kind.as_str()), Some("panic"));
        assert_eq!(report.results[1].output, Some(json!({"ok": 1})));
        assert_eq!(report.state.metrics.total_actions, 2);
    }

    #[test]
    fn test_learn_with_empty_history_is_noop() {
        let (engine, _) = engine(vec![]);
        let mut state = CognitionState::new();
        state.state = CognitionPhase::Running;
        let learned = engine.learn(state.clone());
        assert_eq!(learned.state, CognitionPhase::Idle);
        assert_eq!(learned.patterns, state.patterns);
        assert_eq!(learned.metrics, state.metrics);
    }

    #[test]
    fn test_learn_dedups_and_caps_patterns() {
        let (engine, _) = engine(vec![]);
        let engine = engine.with_bounds(10, 3);
        let mut state = CognitionState::new();
        let outcome = |handler: &str, ok: bool| ActionOutcome {
            handler: handler.to_string(),
            output: ok.then(|| json!({})),
            error: (!ok).then(|| ErrorRecord {
                kind: "handler".into(),
                message: "x".into(),
            }),
        };
        state.history.push(HistoryEntry {
            timestamp: Utc::now(),
            summary: "one".into(),
            actions: vec![outcome("echo", true), outcome("echo", true), outcome("fetch", false)],
        });

        let learned = engine.learn(state);
        assert_eq!(
            learned.patterns,
            vec!["outcome:echo:ok", "action:fetch", "outcome:fetch:error"]
        );
        assert!((learned.metrics.learning_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
