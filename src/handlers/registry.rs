//! 动作处理器注册表
//!
//! 所有处理器实现 ActionHandler（name / description / schema / handle），由 HandlerRegistry 按名注册与查找；
//! 工作流步骤与 Agent 动作都只按名字引用处理器，未注册的名字在执行时报 UnknownHandler。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 动作处理器：输入输出均为 JSON，错误以字符串描述
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// 处理器名称（工作流 handler 引用与 LLM 动作中的 "handler" 字段）
    fn name(&self) -> &str;

    /// 处理器描述（供认知循环的 Planner 理解功能）
    fn description(&self) -> &str;

    /// 输入 JSON Schema；默认不限参数
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// 执行处理器
    async fn handle(&self, input: Value) -> Result<Value, String>;
}

/// 处理器注册表：启动时填充，运行期只读
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(handler = %name, "handler re-registered, previous entry replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 仅返回给定目录中的处理器 schema；catalog 为空时返回全部
    pub fn to_schema_json(&self, catalog: &[String]) -> String {
        let handlers: Vec<Value> = self
            .handler_names()
            .into_iter()
            .filter(|name| catalog.is_empty() || catalog.contains(name))
            .filter_map(|name| self.handlers.get(&name).map(|h| (name, h)))
            .map(|(name, h)| {
                serde_json::json!({
                    "name": name,
                    "description": h.description(),
                    "input_schema": h.input_schema(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&handlers).unwrap_or_else(|_| "[]".to_string())
    }
}
