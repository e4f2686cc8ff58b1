//! 动作调用 JSON Schema 生成（schemars）
//!
//! 用于将「合法动作列表」的 JSON 结构注入 Planner 的 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 单个动作：处理器名 + 参数
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCallFormat {
    /// 处理器名，必须来自可用处理器列表
    pub handler: String,
    /// 处理器参数
    pub params: HashMap<String, serde_json::Value>,
}

/// 一次认知循环的计划
#[allow(dead_code)]
#[derive(JsonSchema)]
struct CyclePlanFormat {
    pub actions: Vec<ActionCallFormat>,
    /// 一句话总结本轮意图
    pub summary: Option<String>,
    /// 可选：下一轮认知间隔（毫秒）
    pub next_interval_ms: Option<u64>,
}

/// 返回认知计划的 JSON Schema 字符串，可拼入 system prompt
pub fn action_plan_schema_json() -> String {
    let schema = schema_for!(CyclePlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_actions() {
        let schema = action_plan_schema_json();
        assert!(schema.contains("actions"));
        assert!(schema.contains("handler"));
    }
}
