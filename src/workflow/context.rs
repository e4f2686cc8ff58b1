//! 运行上下文
//!
//! 按完成顺序累积 `{step_id -> output}`，并保留工作流原始输入。
//! 上下文只做「复制后扩展」：并行分支各自持有扇出时的快照，互不可见也无需加锁。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::workflow::types::StepId;

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    input: Arc<Value>,
    outputs: Arc<HashMap<StepId, Value>>,
    order: Arc<Vec<StepId>>,
}

impl RunContext {
    pub fn new(input: Value) -> Self {
        Self {
            input: Arc::new(input),
            outputs: Arc::new(HashMap::new()),
            order: Arc::new(Vec::new()),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn get(&self, step: &str) -> Option<&Value> {
        self.outputs.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.outputs.contains_key(step)
    }

    /// 已完成步骤数
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按完成顺序的步骤 ID
    pub fn step_ids(&self) -> &[StepId] {
        &self.order
    }

    /// 返回追加了一个步骤输出的新上下文，自身不变
    pub fn with_output(&self, step: impl Into<StepId>, output: Value) -> Self {
        let step = step.into();
        let mut outputs = (*self.outputs).clone();
        let mut order = (*self.order).clone();
        if outputs.insert(step.clone(), output).is_none() {
            order.push(step);
        }
        Self {
            input: Arc::clone(&self.input),
            outputs: Arc::new(outputs),
            order: Arc::new(order),
        }
    }

    /// 合并分支上下文中快照之后新增的输出（`since` 为扇出时的长度）
    pub fn merge_branch(&self, branch: &RunContext, since: usize) -> Self {
        branch
            .order
            .iter()
            .skip(since)
            .filter_map(|id| branch.outputs.get(id).map(|v| (id, v)))
            .fold(self.clone(), |ctx, (id, v)| ctx.with_output(id.clone(), v.clone()))
    }

    /// 整个上下文的 JSON 视图：`{"input": ..., "steps": {id: output}}`
    pub fn to_value(&self) -> Value {
        let steps: Map<String, Value> = self
            .order
            .iter()
            .filter_map(|id| self.outputs.get(id).map(|v| (id.clone(), v.clone())))
            .collect();
        serde_json::json!({
            "input": self.input.as_ref().clone(),
            "steps": Value::Object(steps),
        })
    }
}
