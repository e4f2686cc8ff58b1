//! 工作流类型定义
//!
//! 定义工作流、节点树、步骤、参数引用、fallback 以及执行日志等核心数据类型。
//! `WorkflowDefinition` 构建后不可变，可被多个调用方并发运行。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::WorkflowError;
use crate::workflow::context::RunContext;

pub type WorkflowId = String;
pub type StepId = String;

/// 对先前步骤输出的引用：`{step, path}`，执行时才解析
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    pub step: StepId,
    /// 点分路径，如 `data.items.0.price`；空串表示整个输出
    pub path: String,
}

impl StepRef {
    pub fn new(step: impl Into<StepId>, path: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            path: path.into(),
        }
    }
}

/// 步骤参数值
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// 字面量，原样传入
    Literal(Value),
    /// 引用先前步骤的输出
    Ref(StepRef),
    /// 引用工作流原始输入中的路径
    Input(String),
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        ParamValue::Literal(v)
    }
}

impl From<StepRef> for ParamValue {
    fn from(r: StepRef) -> Self {
        ParamValue::Ref(r)
    }
}

/// fallback 的决定
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackDecision {
    /// 以替代输出视为成功，继续执行
    Continue(Value),
    /// 终止整个运行，消息作为 Run 的错误
    Stop(String),
}

/// 重试耗尽后调用的恢复逻辑
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn recover(&self, error: &WorkflowError, context: &RunContext) -> FallbackDecision;
}

/// 闭包形式的 fallback
pub struct FnFallback<F>(F);

#[async_trait]
impl<F> Fallback for FnFallback<F>
where
    F: Fn(&WorkflowError, &RunContext) -> FallbackDecision + Send + Sync,
{
    async fn recover(&self, error: &WorkflowError, context: &RunContext) -> FallbackDecision {
        (self.0)(error, context)
    }
}

/// 用闭包构造 fallback
pub fn fallback_fn<F>(f: F) -> Arc<dyn Fallback>
where
    F: Fn(&WorkflowError, &RunContext) -> FallbackDecision + Send + Sync + 'static,
{
    Arc::new(FnFallback(f))
}

/// 步骤选项
#[derive(Clone)]
pub struct StepOptions {
    /// 单次调用超时；None 时使用引擎默认值（5 分钟）
    pub timeout: Option<Duration>,
    /// 失败后额外重试次数
    pub retries: u32,
    /// 两次尝试之间的固定间隔；None 时使用引擎默认值（1000 ms）
    pub retry_backoff: Option<Duration>,
    /// 是否以 info 级别追踪该步骤
    pub track: bool,
    /// 运行前必须已完成的步骤
    pub dependencies: Vec<StepId>,
    /// 是否在执行日志中保留输入输出内容
    pub store_io: bool,
    pub fallback: Option<Arc<dyn Fallback>>,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 0,
            retry_backoff: None,
            track: false,
            dependencies: Vec::new(),
            store_io: false,
            fallback: None,
        }
    }
}

impl fmt::Debug for StepOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepOptions")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("track", &self.track)
            .field("dependencies", &self.dependencies)
            .field("store_io", &self.store_io)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// 单个步骤：一次处理器调用
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub id: StepId,
    pub name: String,
    pub handler: String,
    pub params: BTreeMap<String, ParamValue>,
    pub options: StepOptions,
}

impl StepSpec {
    pub fn new(id: impl Into<StepId>, handler: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            handler: handler.into(),
            params: BTreeMap::new(),
            options: StepOptions::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 字面量参数
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), ParamValue::Literal(value.into()));
        self
    }

    /// 引用步骤输出的参数
    pub fn param_ref(mut self, key: impl Into<String>, step: impl Into<StepId>, path: impl Into<String>) -> Self {
        self.params.insert(key.into(), ParamValue::Ref(StepRef::new(step, path)));
        self
    }

    /// 引用工作流输入的参数
    pub fn param_input(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.params.insert(key.into(), ParamValue::Input(path.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.options.retry_backoff = Some(backoff);
        self
    }

    pub fn track(mut self, track: bool) -> Self {
        self.options.track = track;
        self
    }

    pub fn store_io(mut self, store_io: bool) -> Self {
        self.options.store_io = store_io;
        self
    }

    pub fn depends_on(mut self, step: impl Into<StepId>) -> Self {
        self.options.dependencies.push(step.into());
        self
    }

    pub fn fallback(mut self, fallback: Arc<dyn Fallback>) -> Self {
        self.options.fallback = Some(fallback);
        self
    }
}

/// 分支谓词的闭包形式：读取整个上下文，返回标签值
pub type PredicateFn = Arc<dyn Fn(&RunContext) -> Result<Value, WorkflowError> + Send + Sync>;

/// 分支谓词
#[derive(Clone)]
pub enum Predicate {
    /// 解析引用得到标签值
    Ref(StepRef),
    Func(PredicateFn),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            Predicate::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// 将谓词结果转换为分支标签：布尔为 "true"/"false"，字符串原样，其余按 JSON 文本
pub fn branch_tag(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 工作流节点树
#[derive(Debug, Clone)]
pub enum Node {
    /// 严格按顺序执行，首个未恢复的失败终止后续兄弟节点
    Sequence(Vec<Node>),
    /// 并发执行所有子节点，全部结束后汇合
    Parallel(Vec<Node>),
    /// 按谓词标签选择唯一分支
    Branch {
        predicate: Predicate,
        cases: BTreeMap<String, Node>,
    },
    Step(StepSpec),
}

impl From<StepSpec> for Node {
    fn from(spec: StepSpec) -> Self {
        Node::Step(spec)
    }
}

impl Node {
    /// 深度优先遍历所有步骤
    pub fn steps(&self) -> Vec<&StepSpec> {
        let mut out = Vec::new();
        self.collect_steps(&mut out);
        out
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a StepSpec>) {
        match self {
            Node::Sequence(children) | Node::Parallel(children) => {
                for child in children {
                    child.collect_steps(out);
                }
            }
            Node::Branch { cases, .. } => {
                for case in cases.values() {
                    case.collect_steps(out);
                }
            }
            Node::Step(spec) => out.push(spec),
        }
    }
}

/// 工作流定义（不可变）
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub root: Node,
    /// 整个运行的超时；None 时使用配置默认值（可为不限）
    pub timeout: Option<Duration>,
    pub generate_execution_log: bool,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 日志中的错误记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

impl From<&WorkflowError> for ErrorRecord {
    fn from(e: &WorkflowError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// 单个步骤的执行记录（一次逻辑尝试，重试不会产生额外记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// store_io 为 false 时省略
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<ErrorRecord>,
    pub status: StepStatus,
}

/// 执行日志：除最终输出 / 错误外唯一对外可见的运行产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub workflow_id: WorkflowId,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ErrorRecord>,
    pub steps: Vec<StepRecord>,
}

impl ExecutionLog {
    pub fn step(&self, id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_tag_conversion() {
        assert_eq!(branch_tag(&Value::Bool(true)), "true");
        assert_eq!(branch_tag(&Value::String("buy".into())), "buy");
        assert_eq!(branch_tag(&serde_json::json!(3)), "3");
    }

    #[test]
    fn test_node_steps_walks_every_case() {
        let mut cases = BTreeMap::new();
        cases.insert("true".to_string(), Node::from(StepSpec::new("yes", "echo")));
        cases.insert("false".to_string(), Node::from(StepSpec::new("no", "echo")));
        let root = Node::Sequence(vec![
            StepSpec::new("a", "echo").into(),
            Node::Parallel(vec![StepSpec::new("b", "echo").into(), StepSpec::new("c", "echo").into()]),
            Node::Branch {
                predicate: Predicate::Ref(StepRef::new("a", "ok")),
                cases,
            },
        ]);
        let ids: Vec<&str> = root.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "no", "yes"]);
    }

    #[test]
    fn test_step_record_serializes_snake_case_status() {
        let json = serde_json::to_value(StepStatus::Completed).unwrap();
        assert_eq!(json, "completed");
    }
}
