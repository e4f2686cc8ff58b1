//! Lux 入口：加载配置、注册内置处理器、启动演示 Agent 与工作流，等待 Ctrl+C 后停止所有 Agent。
//!
//! 用法：`lux [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use lux::agent::{Agent, AgentRuntime, AgentSupervisor, SignalRoutes};
use lux::cognition::{CognitionEngine, CognitionLimits, LlmPlanner};
use lux::config::load_config_or_default;
use lux::core::{run_with_graceful_shutdown, ShutdownCoordinator, ShutdownManager, StopAgents, TaskScheduler};
use lux::handlers::{EchoHandler, HandlerExecutor, HandlerRegistry, HttpRequestHandler};
use lux::workflow::{sequence, step, RunOptions, StepSpec, WorkflowBuilder, WorkflowCatalog, WorkflowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lux::observability::init();

    let cfg = load_config_or_default(std::env::args().nth(1).map(PathBuf::from));
    tracing::info!(app = cfg.app.name.as_deref().unwrap_or("lux"), "starting");

    let mut registry = HandlerRegistry::new();
    registry.register(EchoHandler);
    registry.register(HttpRequestHandler::new());
    let registry = Arc::new(registry);
    let handlers = HandlerExecutor::new(Arc::clone(&registry));
    let engine = WorkflowEngine::from_config(handlers.clone(), &cfg.workflow);

    let greet = WorkflowBuilder::new("greet")
        .description("echo a name, then greet it")
        .input_schema(json!({"type": "object", "properties": {"name": {"type": "string"}}}))
        .root(sequence([
            step(StepSpec::new("lookup", "echo").param_input("name", "name").track(true)),
            step(
                StepSpec::new("greet", "echo")
                    .param("greeting", "hello")
                    .param_ref("name", "lookup", "name")
                    .retries(1),
            ),
        ]))
        .generate_execution_log(true)
        .build()
        .context("Failed to build demo workflow")?;

    let run = engine
        .run(&greet, json!({"name": "lux"}), RunOptions::started_by("cli"))
        .await;
    match &run.log {
        Some(log) => tracing::info!(log = %serde_json::to_string(log)?, "demo workflow finished"),
        None => tracing::info!(output = ?run.output(), "demo workflow finished"),
    }

    let mut catalog = WorkflowCatalog::new();
    catalog.register(greet);

    let llm = lux::llm::create_client(&cfg.llm);
    let cognition = CognitionEngine::new(Arc::new(LlmPlanner::new(llm, Arc::clone(&registry))), handlers.clone())
        .with_bounds(cfg.agent.max_history, cfg.agent.max_patterns);

    let runtime = AgentRuntime {
        handlers,
        workflows: Arc::new(catalog),
        engine,
        cognition: Arc::new(cognition),
        tasks: TaskScheduler::new(),
        settings: cfg.agent.clone(),
    };
    let supervisor = Arc::new(
        AgentSupervisor::new(runtime, cfg.supervisor.clone())
            .with_signal_handler(Arc::new(SignalRoutes::new().route("ping", "echo"))),
    );

    let demo = Agent::new("greeter", "greet whoever shows up")
        .with_handlers(["echo"])
        .with_workflows(["greet"])
        .with_cognition_interval(cfg.agent.cognition_interval_ms)
        .with_limits(CognitionLimits::from_config(&cfg.agent));
    let handle = supervisor.start(demo).await?;
    handle.schedule("greet", "*/5 * * * *", json!({"name": "scheduler"})).await?;

    let mut coordinator = ShutdownCoordinator::new().with_timeout(cfg.app.shutdown_timeout());
    coordinator.register(StopAgents(Arc::clone(&supervisor)));
    run_with_graceful_shutdown(Arc::new(ShutdownManager::new()), std::future::pending::<()>(), coordinator).await;

    Ok(())
}
