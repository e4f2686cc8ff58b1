//! 步骤依赖图
//!
//! 从节点树收集所有步骤，并用邻接表和入度表检查 `dependencies` 声明：
//! 步骤 ID 唯一、依赖必须指向已知步骤、依赖关系不能成环。

use std::collections::{HashMap, VecDeque};

use crate::core::WorkflowError;
use crate::workflow::types::*;

/// 步骤依赖图
pub struct StepGraph {
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    pub adjacency: HashMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 ID -> 声明的依赖数
    pub in_degree: HashMap<StepId, usize>,
}

impl StepGraph {
    /// 创建依赖图；重复 ID 或未知依赖直接报错
    pub fn new(root: &Node) -> Result<Self, WorkflowError> {
        let steps = root.steps();
        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut in_degree: HashMap<StepId, usize> = HashMap::new();

        for step in &steps {
            if in_degree.insert(step.id.clone(), 0).is_some() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            adjacency.insert(step.id.clone(), Vec::new());
        }

        for step in &steps {
            for dep in &step.options.dependencies {
                let Some(dependents) = adjacency.get_mut(dep) else {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                };
                dependents.push(step.id.clone());
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self { adjacency, in_degree })
    }

    pub fn len(&self) -> usize {
        self.in_degree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_degree.is_empty()
    }

    /// Kahn 拓扑排序；存在环时返回 InvalidDefinition
    pub fn topological_order(&self) -> Result<Vec<StepId>, WorkflowError> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: Vec<StepId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();
        let mut queue: VecDeque<StepId> = ready.into();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
            order.push(id);
        }

        if order.len() != self.in_degree.len() {
            return Err(WorkflowError::InvalidDefinition(
                "cyclic step dependencies".to_string(),
            ));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(steps: Vec<StepSpec>) -> Node {
        Node::Sequence(steps.into_iter().map(Node::from).collect())
    }

    #[test]
    fn test_graph_construction() {
        let root = seq(vec![
            StepSpec::new("a", "echo"),
            StepSpec::new("b", "echo").depends_on("a"),
        ]);
        let graph = StepGraph::new(&root).unwrap();

        assert_eq!(graph.in_degree.get("a"), Some(&0));
        assert_eq!(graph.in_degree.get("b"), Some(&1));
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let root = seq(vec![StepSpec::new("a", "echo"), StepSpec::new("a", "echo")]);
        assert!(matches!(StepGraph::new(&root), Err(WorkflowError::InvalidDefinition(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let root = seq(vec![StepSpec::new("a", "echo").depends_on("zzz")]);
        assert!(StepGraph::new(&root).is_err());
    }

    #[test]
    fn test_cycle_detected() {
        let root = seq(vec![
            StepSpec::new("a", "echo").depends_on("b"),
            StepSpec::new("b", "echo").depends_on("a"),
        ]);
        let graph = StepGraph::new(&root).unwrap();
        assert!(graph.topological_order().is_err());
    }
}
