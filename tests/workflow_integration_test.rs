//! 工作流集成测试

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use lux::core::WorkflowError;
use lux::handlers::{ActionHandler, EchoHandler, HandlerExecutor, HandlerRegistry};
use lux::workflow::*;

/// 总是失败并计数
struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ActionHandler for AlwaysFails {
    fn name(&self) -> &str {
        "always_fails"
    }
    fn description(&self) -> &str {
        "fails every call"
    }
    async fn handle(&self, _input: Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("upstream unavailable".to_string())
    }
}

struct Slow;

#[async_trait]
impl ActionHandler for Slow {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "sleeps for a second"
    }
    async fn handle(&self, input: Value) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(input)
    }
}

/// 延迟后才产生副作用
struct DelayedEffect {
    effects: Arc<AtomicU32>,
}

#[async_trait]
impl ActionHandler for DelayedEffect {
    fn name(&self) -> &str {
        "delayed_effect"
    }
    fn description(&self) -> &str {
        "sleeps then records an effect"
    }
    async fn handle(&self, input: Value) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.effects.fetch_add(1, Ordering::SeqCst);
        Ok(input)
    }
}

fn engine() -> (WorkflowEngine, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(EchoHandler);
    registry.register(Slow);
    registry.register(AlwaysFails {
        calls: Arc::clone(&calls),
    });
    let engine = WorkflowEngine::new(
        HandlerExecutor::new(Arc::new(registry)),
        StepDefaults {
            timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(5),
        },
    );
    (engine, calls)
}

#[tokio::test]
async fn test_reference_resolves_previous_output() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("refs")
        .generate_execution_log(true)
        .root(sequence([
            step(StepSpec::new("a", "echo").param("value", json!({"price": 42}))),
            step(StepSpec::new("b", "echo").param_ref("got", "a", "value").store_io(true)),
        ]))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert_eq!(run.output(), Some(&json!({"got": {"price": 42}})));

    let log = run.log.unwrap();
    assert_eq!(log.step("b").unwrap().input, Some(json!({"got": {"price": 42}})));
    // a 没有开启 store_io，只保留记录不保留内容
    assert_eq!(log.step("a").unwrap().input, None);
    assert_eq!(log.step("a").unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_reference_to_step_that_never_ran_fails_step() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("dangling")
        .generate_execution_log(true)
        .root(StepSpec::new("b", "echo").param_ref("x", "ghost", "value"))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert!(matches!(run.error(), Some(WorkflowError::UnresolvedReference { .. })));
    let log = run.log.unwrap();
    assert_eq!(log.step("b").unwrap().status, StepStatus::Failed);
    assert_eq!(log.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_fallback_continue_after_retries_is_single_completed_record() {
    let (engine, calls) = engine();
    let def = WorkflowBuilder::new("recover")
        .generate_execution_log(true)
        .root(
            StepSpec::new("flaky", "always_fails")
                .retries(2)
                .store_io(true)
                .fallback(fallback_fn(|_, _| FallbackDecision::Continue(json!({"retried": true})))),
        )
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::started_by("tester")).await;
    assert!(run.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let log = run.log.unwrap();
    assert_eq!(log.started_by, "tester");
    assert_eq!(log.steps.len(), 1);
    let record = &log.steps[0];
    assert_eq!(record.status, StepStatus::Completed);
    assert_eq!(record.error, None);
    assert_eq!(record.output, Some(json!({"retried": true})));
    assert_eq!(log.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_fallback_stop_fails_run_with_message() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("halt")
        .generate_execution_log(true)
        .root(sequence([
            step(
                StepSpec::new("fails", "always_fails")
                    .fallback(fallback_fn(|_, _| FallbackDecision::Stop("msg".to_string()))),
            ),
            step(StepSpec::new("never", "echo")),
        ]))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert_eq!(run.error().map(|e| e.to_string()), Some("msg".to_string()));

    let log = run.log.unwrap();
    assert_eq!(log.status, RunStatus::Failed);
    assert_eq!(log.step("fails").unwrap().status, StepStatus::Failed);
    assert!(log.step("never").is_none());
}

#[tokio::test]
async fn test_parallel_keeps_successful_sibling_output() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("fan_out")
        .generate_execution_log(true)
        .root(parallel([
            step(StepSpec::new("bad", "always_fails")),
            step(StepSpec::new("good", "echo").param("ok", true)),
        ]))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert!(run.error().is_some());
    assert_eq!(run.context.get("good"), Some(&json!({"ok": true})));

    let log = run.log.unwrap();
    assert_eq!(log.step("good").unwrap().status, StepStatus::Completed);
    assert_eq!(log.step("bad").unwrap().status, StepStatus::Failed);
}

#[tokio::test]
async fn test_step_timeout_is_retryable_handler_failure() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("slow")
        .generate_execution_log(true)
        .root(StepSpec::new("s", "slow").timeout(Duration::from_millis(20)).retries(1))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert_eq!(run.error(), Some(&WorkflowError::Timeout(20)));
    let record = run.log.unwrap().steps.remove(0);
    assert_eq!(record.error.map(|e| e.kind), Some("timeout".to_string()));
}

#[tokio::test]
async fn test_workflow_timeout_returns_partial_log() {
    let (engine, _) = engine();
    let def = WorkflowBuilder::new("bounded")
        .generate_execution_log(true)
        .timeout(Duration::from_millis(100))
        .root(sequence([
            step(StepSpec::new("quick", "echo")),
            step(StepSpec::new("slow", "slow")),
        ]))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert_eq!(run.error(), Some(&WorkflowError::WorkflowTimeout(100)));
    let log = run.log.unwrap();
    assert_eq!(log.status, RunStatus::Failed);
    assert_eq!(log.step("quick").unwrap().status, StepStatus::Completed);
    assert_eq!(log.step("slow").unwrap().status, StepStatus::Running);
}

#[tokio::test]
async fn test_workflow_timeout_aborts_in_flight_handlers_and_keeps_completed_outputs() {
    let effects = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(EchoHandler);
    registry.register(DelayedEffect {
        effects: Arc::clone(&effects),
    });
    let engine = WorkflowEngine::new(HandlerExecutor::new(Arc::new(registry)), StepDefaults::default());
    let def = WorkflowBuilder::new("cut_short")
        .timeout(Duration::from_millis(50))
        .root(sequence([
            step(StepSpec::new("first", "echo").param("ok", true)),
            step(StepSpec::new("late", "delayed_effect")),
        ]))
        .build()
        .unwrap();

    let run = engine.run(&def, json!({}), RunOptions::default()).await;
    assert_eq!(run.error(), Some(&WorkflowError::WorkflowTimeout(50)));
    assert_eq!(run.context.get("first"), Some(&json!({"ok": true})));
    assert!(!run.context.contains("late"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(effects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_same_definition_runs_concurrently() {
    let (engine, _) = engine();
    let def = Arc::new(
        WorkflowBuilder::new("shared")
            .root(StepSpec::new("echo", "echo").param_input("n", "n"))
            .build()
            .unwrap(),
    );

    let runs = futures_util::future::join_all((0..5).map(|n| {
        let engine = engine.clone();
        let def = Arc::clone(&def);
        async move { engine.run(&def, json!({"n": n}), RunOptions::default()).await }
    }))
    .await;

    for (n, run) in runs.iter().enumerate() {
        assert_eq!(run.output(), Some(&json!({"n": n})));
    }
}

#[test]
fn test_unknown_dependency_rejected_at_build() {
    let result = WorkflowBuilder::new("bad")
        .root(StepSpec::new("a", "echo").depends_on("nope"))
        .build();
    assert!(matches!(result, Err(WorkflowError::InvalidDefinition(_))));
}
