//! 错误类型
//!
//! 工作流、Agent 运行时、认知循环与协作网关各自一套错误枚举；
//! `WorkflowError::is_retryable` 决定 Step Executor 是否对该错误重试。

use thiserror::Error;

/// 工作流执行过程中的错误（引用解析、分支、处理器、超时、fallback 终止等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Unresolved reference {step}.{path}: {reason}")]
    UnresolvedReference {
        step: String,
        path: String,
        reason: String,
    },

    #[error("Step {step} depends on {dependency}, which has not completed")]
    UnmetDependency { step: String, dependency: String },

    #[error("Unmatched branch: no case for tag '{0}'")]
    UnmatchedBranch(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Handler timed out after {0} ms")]
    Timeout(u64),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// fallback 主动终止，消息原样作为 Run 的错误
    #[error("{0}")]
    FallbackStop(String),

    #[error("Workflow timed out after {0} ms")]
    WorkflowTimeout(u64),

    #[error("Workflow not found: {0}")]
    NotFound(String),
}

impl WorkflowError {
    /// 稳定的错误类别，写入执行日志与审计记录
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::UnknownHandler(_)
            | WorkflowError::UnresolvedReference { .. }
            | WorkflowError::UnmetDependency { .. }
            | WorkflowError::InvalidDefinition(_)
            | WorkflowError::NotFound(_) => "validation",
            WorkflowError::UnmatchedBranch(_) => "unmatched_branch",
            WorkflowError::Handler(_) => "handler",
            WorkflowError::Timeout(_) => "timeout",
            WorkflowError::HandlerPanicked(_) => "panic",
            WorkflowError::FallbackStop(_) => "fallback_stop",
            WorkflowError::WorkflowTimeout(_) => "workflow_timeout",
        }
    }

    /// 仅处理器错误 / 超时 / panic 可按步骤策略重试；校验类错误直接失败
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Handler(_) | WorkflowError::Timeout(_) | WorkflowError::HandlerPanicked(_)
        )
    }
}

/// 认知循环（Reflection）错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CognitionError {
    #[error("Planner failed: {0}")]
    Planner(String),

    #[error("Planner output could not be parsed: {0}")]
    InvalidPlan(String),
}

/// Agent 运行时与监管者错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent already running: {0}")]
    AlreadyRunning(String),

    /// 进程已退出或邮箱已关闭
    #[error("Agent process unavailable: {0}")]
    ProcessUnavailable(String),

    /// 工作流不在该 Agent 的 available_workflows 中
    #[error("Workflow '{workflow}' not available to agent {agent}")]
    WorkflowNotAvailable { agent: String, workflow: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// 协作网关错误：`Unauthorized` 与协议处理器自身的错误可区分
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaborationError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol not implemented: {0}")]
    NotImplemented(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
