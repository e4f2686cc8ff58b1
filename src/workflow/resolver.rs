//! 引用解析
//!
//! 将步骤参数中的 `Ref{step, path}` / `Input(path)` 替换为上下文中的实际值；
//! 引用了未运行的步骤或路径不存在均为该步骤的输入准备失败。

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::WorkflowError;
use crate::workflow::context::RunContext;
use crate::workflow::types::{ParamValue, StepRef};

/// 沿点分路径进入 JSON；数组用数字下标，空路径返回自身
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(value, |current, seg| match current {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// 解析单个引用
pub fn resolve_ref(r: &StepRef, ctx: &RunContext) -> Result<Value, WorkflowError> {
    let output = ctx.get(&r.step).ok_or_else(|| WorkflowError::UnresolvedReference {
        step: r.step.clone(),
        path: r.path.clone(),
        reason: "step has not run".to_string(),
    })?;
    walk_path(output, &r.path)
        .cloned()
        .ok_or_else(|| WorkflowError::UnresolvedReference {
            step: r.step.clone(),
            path: r.path.clone(),
            reason: "path not found in step output".to_string(),
        })
}

/// 解析单个参数值
pub fn resolve(value: &ParamValue, ctx: &RunContext) -> Result<Value, WorkflowError> {
    match value {
        ParamValue::Literal(v) => Ok(v.clone()),
        ParamValue::Ref(r) => resolve_ref(r, ctx),
        ParamValue::Input(path) => walk_path(ctx.input(), path).cloned().ok_or_else(|| {
            WorkflowError::UnresolvedReference {
                step: "input".to_string(),
                path: path.clone(),
                reason: "path not found in workflow input".to_string(),
            }
        }),
    }
}

/// 解析整组参数为 JSON 对象；任一失败即返回该错误
pub fn resolve_params(
    params: &BTreeMap<String, ParamValue>,
    ctx: &RunContext,
) -> Result<Value, WorkflowError> {
    let mut out = Map::new();
    for (key, value) in params {
        out.insert(key.clone(), resolve(value, ctx)?);
    }
    Ok(Value::Object(out))
}
