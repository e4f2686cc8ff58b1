//! 工作流构建器
//!
//! 提供流畅的 API 构建节点树与工作流定义；校验在 `build()` 时完成：
//! 至少一个步骤、步骤 ID 唯一、依赖合法无环、schema 为结构合法的 object schema。

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::core::WorkflowError;
use crate::workflow::graph::StepGraph;
use crate::workflow::types::*;

/// 顺序节点
pub fn sequence(children: impl IntoIterator<Item = Node>) -> Node {
    Node::Sequence(children.into_iter().collect())
}

/// 并行节点
pub fn parallel(children: impl IntoIterator<Item = Node>) -> Node {
    Node::Parallel(children.into_iter().collect())
}

/// 步骤节点
pub fn step(spec: StepSpec) -> Node {
    Node::Step(spec)
}

/// 以引用值为标签的分支
pub fn branch_on<K: Into<String>>(
    reference: StepRef,
    cases: impl IntoIterator<Item = (K, Node)>,
) -> Node {
    Node::Branch {
        predicate: Predicate::Ref(reference),
        cases: collect_cases(cases),
    }
}

/// 以闭包结果为标签的分支
pub fn branch_with<K, F>(predicate: F, cases: impl IntoIterator<Item = (K, Node)>) -> Node
where
    K: Into<String>,
    F: Fn(&crate::workflow::RunContext) -> Result<Value, WorkflowError> + Send + Sync + 'static,
{
    Node::Branch {
        predicate: Predicate::Func(std::sync::Arc::new(predicate)),
        cases: collect_cases(cases),
    }
}

fn collect_cases<K: Into<String>>(cases: impl IntoIterator<Item = (K, Node)>) -> BTreeMap<String, Node> {
    cases.into_iter().map(|(k, n)| (k.into(), n)).collect()
}

/// 工作流构建器
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    input_schema: Option<Value>,
    output_schema: Option<Value>,
    root: Option<Node>,
    timeout: Option<Duration>,
    generate_execution_log: bool,
}

impl WorkflowBuilder {
    /// 创建新的工作流构建器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("wf_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            root: None,
            timeout: None,
            generate_execution_log: false,
        }
    }

    /// 指定固定 ID（默认随机）
    pub fn id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// 根节点
    pub fn root(mut self, node: impl Into<Node>) -> Self {
        self.root = Some(node.into());
        self
    }

    /// 整个运行的超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn generate_execution_log(mut self, enabled: bool) -> Self {
        self.generate_execution_log = enabled;
        self
    }

    /// 构建工作流
    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        let root = self
            .root
            .ok_or_else(|| WorkflowError::InvalidDefinition("root node is required".to_string()))?;

        let graph = StepGraph::new(&root)?;
        if graph.is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow must contain at least one step".to_string(),
            ));
        }
        graph.topological_order()?;
        check_empty_containers(&root)?;

        if let Some(schema) = &self.input_schema {
            check_object_schema("input_schema", schema)?;
        }
        if let Some(schema) = &self.output_schema {
            check_object_schema("output_schema", schema)?;
        }

        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            root,
            timeout: self.timeout,
            generate_execution_log: self.generate_execution_log,
        })
    }
}

fn check_empty_containers(node: &Node) -> Result<(), WorkflowError> {
    match node {
        Node::Sequence(children) | Node::Parallel(children) => {
            if children.is_empty() {
                return Err(WorkflowError::InvalidDefinition(
                    "sequence/parallel node without children".to_string(),
                ));
            }
            children.iter().try_for_each(check_empty_containers)
        }
        Node::Branch { cases, .. } => {
            if cases.is_empty() {
                return Err(WorkflowError::InvalidDefinition("branch without cases".to_string()));
            }
            cases.values().try_for_each(check_empty_containers)
        }
        Node::Step(spec) => {
            if spec.handler.is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step '{}' has no handler",
                    spec.id
                )));
            }
            Ok(())
        }
    }
}

/// 仅做结构检查：必须是对象，type（若有）为 "object"，properties / required 形状正确
fn check_object_schema(label: &str, schema: &Value) -> Result<(), WorkflowError> {
    let invalid = |why: &str| WorkflowError::InvalidDefinition(format!("{}: {}", label, why));

    let obj = schema.as_object().ok_or_else(|| invalid("schema must be a JSON object"))?;
    if let Some(ty) = obj.get("type") {
        if ty != "object" {
            return Err(invalid("schema type must be \"object\""));
        }
    }
    if let Some(props) = obj.get("properties") {
        if !props.is_object() {
            return Err(invalid("properties must be an object"));
        }
    }
    if let Some(required) = obj.get("required") {
        let ok = required
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !ok {
            return Err(invalid("required must be an array of strings"));
        }
    }
    Ok(())
}
