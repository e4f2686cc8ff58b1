//! 工作流引擎
//!
//! 深度优先解释节点树并维护运行上下文：
//! - Sequence：严格顺序，首个未恢复的失败终止后续兄弟
//! - Parallel：以扇出时的上下文快照并发执行全部子节点，全部结束后汇合；
//!   某分支失败不取消其它分支，成功分支的输出仍合并进上下文，整体结果为失败
//! - Branch：按谓词标签选择唯一分支，无匹配为 unmatched_branch
//! - Step：解析参数后交给 StepExecutor，成功则把输出追加进上下文
//!
//! 没有贯穿整个运行的取消令牌：运行一旦开始只能由步骤 / 工作流超时结束。
//! 工作流整体超时时求值 future 被丢弃，进行中的处理器调用随之中止；
//! 已完成步骤的输出保留在返回的上下文里。

use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;

use crate::config::WorkflowSection;
use crate::core::WorkflowError;
use crate::handlers::HandlerExecutor;
use crate::workflow::context::RunContext;
use crate::workflow::log::LogRecorder;
use crate::workflow::resolver::{resolve_params, resolve_ref};
use crate::workflow::step::{StepDefaults, StepExecutor};
use crate::workflow::types::*;

/// 运行选项
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 发起者（Agent ID、"cli" 等），写入执行日志
    pub started_by: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            started_by: "system".to_string(),
        }
    }
}

impl RunOptions {
    pub fn started_by(who: impl Into<String>) -> Self {
        Self {
            started_by: who.into(),
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub result: Result<Value, WorkflowError>,
    /// 仅在定义开启 generate_execution_log 时存在
    pub log: Option<ExecutionLog>,
    /// 最终上下文；工作流整体超时时为超时前已完成步骤的输出
    pub context: RunContext,
}

impl WorkflowRun {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn output(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        self.result.as_ref().err()
    }
}

/// 节点求值结果：上下文总是返回，即使失败
struct NodeOutcome {
    ctx: RunContext,
    result: Result<Value, WorkflowError>,
}

/// 单次运行的共享状态：执行日志与按完成顺序累积的上下文
struct RunScope {
    rec: LogRecorder,
    progress: Mutex<RunContext>,
}

impl RunScope {
    fn record_output(&self, step: &str, output: &Value) {
        if let Ok(mut progress) = self.progress.lock() {
            *progress = progress.with_output(step, output.clone());
        }
    }

    fn progress(&self) -> Option<RunContext> {
        self.progress.lock().ok().map(|p| p.clone())
    }
}

/// 工作流引擎：无运行期可变状态，同一定义可并发运行
#[derive(Clone)]
pub struct WorkflowEngine {
    steps: StepExecutor,
    default_timeout: Option<Duration>,
}

impl WorkflowEngine {
    pub fn new(handlers: HandlerExecutor, defaults: StepDefaults) -> Self {
        Self {
            steps: StepExecutor::new(handlers, defaults),
            default_timeout: None,
        }
    }

    /// 按 [workflow] 配置创建
    pub fn from_config(handlers: HandlerExecutor, section: &WorkflowSection) -> Self {
        let defaults = StepDefaults {
            timeout: Duration::from_millis(section.step_timeout_ms),
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
        };
        Self {
            steps: StepExecutor::new(handlers, defaults),
            default_timeout: section.workflow_timeout_ms.map(Duration::from_millis),
        }
    }

    pub async fn run(&self, def: &WorkflowDefinition, input: Value, opts: RunOptions) -> WorkflowRun {
        let recorder = if def.generate_execution_log {
            LogRecorder::enabled(def.id.clone(), opts.started_by.clone(), input.clone())
        } else {
            LogRecorder::disabled()
        };
        tracing::info!(workflow = %def.name, id = %def.id, started_by = %opts.started_by, "workflow run started");

        let ctx = RunContext::new(input);
        let scope = RunScope {
            rec: recorder,
            progress: Mutex::new(ctx.clone()),
        };
        let eval = self.eval(&def.root, ctx.clone(), &scope);
        let outcome = match def.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, eval).await {
                Ok(outcome) => outcome,
                Err(_) => NodeOutcome {
                    ctx: scope.progress().unwrap_or(ctx),
                    result: Err(WorkflowError::WorkflowTimeout(limit.as_millis() as u64)),
                },
            },
            None => eval.await,
        };

        match &outcome.result {
            Ok(_) => tracing::info!(workflow = %def.name, steps = outcome.ctx.len(), "workflow run completed"),
            Err(e) => tracing::warn!(workflow = %def.name, error = %e, "workflow run failed"),
        }

        let log = scope.rec.finish(&outcome.result);
        WorkflowRun {
            result: outcome.result,
            log,
            context: outcome.ctx,
        }
    }

    fn eval<'a>(&'a self, node: &'a Node, ctx: RunContext, scope: &'a RunScope) -> BoxFuture<'a, NodeOutcome> {
        async move {
            match node {
                Node::Sequence(children) => self.eval_sequence(children, ctx, scope).await,
                Node::Parallel(children) => self.eval_parallel(children, ctx, scope).await,
                Node::Branch { predicate, cases } => self.eval_branch(predicate, cases, ctx, scope).await,
                Node::Step(spec) => self.eval_step(spec, ctx, scope).await,
            }
        }
        .boxed()
    }

    async fn eval_sequence(&self, children: &[Node], mut ctx: RunContext, scope: &RunScope) -> NodeOutcome {
        let mut last = Value::Null;
        for child in children {
            let outcome = self.eval(child, ctx, scope).await;
            ctx = outcome.ctx;
            match outcome.result {
                Ok(v) => last = v,
                Err(e) => return NodeOutcome { ctx, result: Err(e) },
            }
        }
        NodeOutcome { ctx, result: Ok(last) }
    }

    async fn eval_parallel(&self, children: &[Node], ctx: RunContext, scope: &RunScope) -> NodeOutcome {
        let fan_out = ctx.len();
        let outcomes = join_all(children.iter().map(|child| self.eval(child, ctx.clone(), scope))).await;

        let mut merged = ctx;
        let mut outputs = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            merged = merged.merge_branch(&outcome.ctx, fan_out);
            match outcome.result {
                Ok(v) => outputs.push(v),
                Err(e) => {
                    outputs.push(Value::Null);
                    first_error.get_or_insert(e);
                }
            }
        }

        let result = match first_error {
            Some(e) => Err(e),
            None => Ok(Value::Array(outputs)),
        };
        NodeOutcome { ctx: merged, result }
    }

    async fn eval_branch(
        &self,
        predicate: &Predicate,
        cases: &std::collections::BTreeMap<String, Node>,
        ctx: RunContext,
        scope: &RunScope,
    ) -> NodeOutcome {
        let tag = match predicate {
            Predicate::Ref(r) => resolve_ref(r, &ctx),
            Predicate::Func(f) => f(&ctx),
        }
        .map(|v| branch_tag(&v));

        let tag = match tag {
            Ok(tag) => tag,
            Err(e) => return NodeOutcome { ctx, result: Err(e) },
        };
        match cases.get(&tag) {
            Some(case) => {
                tracing::debug!(tag = %tag, "branch selected");
                self.eval(case, ctx, scope).await
            }
            None => NodeOutcome {
                ctx,
                result: Err(WorkflowError::UnmatchedBranch(tag)),
            },
        }
    }

    async fn eval_step(&self, spec: &StepSpec, ctx: RunContext, scope: &RunScope) -> NodeOutcome {
        let index = scope.rec.begin_step(spec);
        let opts = &spec.options;

        let prepared = opts
            .dependencies
            .iter()
            .find(|dep| !ctx.contains(dep))
            .map(|dep| {
                Err(WorkflowError::UnmetDependency {
                    step: spec.id.clone(),
                    dependency: dep.clone(),
                })
            })
            .unwrap_or_else(|| resolve_params(&spec.params, &ctx));

        let input = match prepared {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(step = %spec.id, error = %e, "step input preparation failed");
                scope.rec.step_failed(index, &e);
                return NodeOutcome { ctx, result: Err(e) };
            }
        };

        scope.rec.step_running(index, opts.store_io.then(|| input.clone()));
        if opts.track {
            tracing::info!(step = %spec.id, handler = %spec.handler, "step started");
        } else {
            tracing::debug!(step = %spec.id, handler = %spec.handler, "step started");
        }

        match self.steps.run_step(spec, input, &ctx).await {
            Ok(success) => {
                if opts.track {
                    tracing::info!(step = %spec.id, attempts = success.attempts, recovered = success.recovered, "step completed");
                } else {
                    tracing::debug!(step = %spec.id, attempts = success.attempts, recovered = success.recovered, "step completed");
                }
                scope.rec.step_completed(index, opts.store_io.then(|| success.output.clone()));
                scope.record_output(&spec.id, &success.output);
                let ctx = ctx.with_output(spec.id.clone(), success.output.clone());
                NodeOutcome {
                    ctx,
                    result: Ok(success.output),
                }
            }
            Err(e) => {
                tracing::warn!(step = %spec.id, error = %e, "step failed");
                scope.rec.step_failed(index, &e);
                NodeOutcome { ctx, result: Err(e) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{EchoHandler, HandlerRegistry};
    use crate::workflow::builder::*;
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> WorkflowEngine {
        let mut registry = HandlerRegistry::new();
        registry.register(EchoHandler);
        WorkflowEngine::new(
            HandlerExecutor::new(Arc::new(registry)),
            StepDefaults {
                timeout: Duration::from_secs(1),
                retry_backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_sequence_output_is_last_step() {
        let def = WorkflowBuilder::new("seq")
            .root(sequence([
                step(StepSpec::new("a", "echo").param("value", 1)),
                step(StepSpec::new("b", "echo").param("value", 2)),
            ]))
            .build()
            .unwrap();
        let run = engine().run(&def, json!({}), RunOptions::default()).await;
        assert_eq!(run.output(), Some(&json!({"value": 2})));
        assert!(run.log.is_none());
    }

    #[tokio::test]
    async fn test_parallel_output_is_array_in_order() {
        let def = WorkflowBuilder::new("par")
            .root(parallel([
                step(StepSpec::new("a", "echo").param("n", "a")),
                step(StepSpec::new("b", "echo").param("n", "b")),
            ]))
            .build()
            .unwrap();
        let run = engine().run(&def, json!({}), RunOptions::default()).await;
        assert_eq!(run.output(), Some(&json!([{"n": "a"}, {"n": "b"}])));
        assert_eq!(run.context.len(), 2);
    }

    #[tokio::test]
    async fn test_branch_on_input_flag() {
        let def = WorkflowBuilder::new("branch")
            .root(sequence([
                step(StepSpec::new("check", "echo").param_input("ok", "flag")),
                branch_on(
                    StepRef::new("check", "ok"),
                    [
                        ("true", step(StepSpec::new("yes", "echo").param("picked", "yes"))),
                        ("false", step(StepSpec::new("no", "echo").param("picked", "no"))),
                    ],
                ),
            ]))
            .build()
            .unwrap();
        let run = engine().run(&def, json!({"flag": false}), RunOptions::default()).await;
        assert_eq!(run.output(), Some(&json!({"picked": "no"})));
        assert!(!run.context.contains("yes"));
    }

    #[tokio::test]
    async fn test_unmatched_branch_is_fatal() {
        let def = WorkflowBuilder::new("branch")
            .generate_execution_log(true)
            .root(branch_with(
                |_ctx: &RunContext| Ok(json!("sideways")),
                [("up", step(StepSpec::new("up", "echo")))],
            ))
            .build()
            .unwrap();
        let run = engine().run(&def, json!({}), RunOptions::default()).await;
        assert_eq!(run.error(), Some(&WorkflowError::UnmatchedBranch("sideways".into())));
        assert_eq!(run.log.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_unmet_dependency_fails_step() {
        let def = WorkflowBuilder::new("deps")
            .root(parallel([
                step(StepSpec::new("a", "echo")),
                step(StepSpec::new("b", "echo").depends_on("a")),
            ]))
            .build()
            .unwrap();
        let run = engine().run(&def, json!({}), RunOptions::default()).await;
        assert!(matches!(run.error(), Some(WorkflowError::UnmetDependency { .. })));
        // 成功的兄弟分支仍然合并进上下文
        assert!(run.context.contains("a"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut out) = self.0.lock() {
                out.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_untracked_step_completion_logged_at_debug() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let def = WorkflowBuilder::new("quiet")
            .root(StepSpec::new("hushed", "echo").track(false))
            .build()
            .unwrap();
        engine().run(&def, json!({}), RunOptions::default()).await;

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = out
            .lines()
            .find(|l| l.contains("step completed"))
            .expect("completion line");
        assert!(line.contains("DEBUG"));
        assert!(line.contains("step=hushed"));
    }
}
