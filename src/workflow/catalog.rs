//! 工作流目录：按名称登记不可变的工作流定义，供定时调度与外部调用按名运行

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::WorkflowError;
use crate::workflow::types::WorkflowDefinition;

#[derive(Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以定义的 name 登记；同名覆盖
    pub fn register(&mut self, def: WorkflowDefinition) {
        let name = def.name.clone();
        if self.workflows.insert(name.clone(), Arc::new(def)).is_some() {
            tracing::warn!(workflow = %name, "workflow re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).cloned()
    }

    /// 同 get，不存在时返回 NotFound
    pub fn require(&self, name: &str) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.get(name).ok_or_else(|| WorkflowError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepSpec, WorkflowBuilder};

    #[test]
    fn test_register_and_get() {
        let mut catalog = WorkflowCatalog::new();
        let def = WorkflowBuilder::new("daily_report")
            .root(StepSpec::new("a", "echo"))
            .build()
            .unwrap();
        catalog.register(def);

        assert!(catalog.get("daily_report").is_some());
        assert_eq!(catalog.require("other").unwrap_err(), WorkflowError::NotFound("other".into()));
        assert_eq!(catalog.names(), vec!["daily_report"]);
    }
}
