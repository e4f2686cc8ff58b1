//! 工作流：节点树定义、构建器、引用解析、步骤执行与解释引擎

pub mod builder;
pub mod catalog;
pub mod context;
pub mod engine;
pub mod graph;
pub mod log;
pub mod resolver;
pub mod step;
pub mod types;

pub use builder::{branch_on, branch_with, parallel, sequence, step, WorkflowBuilder};
pub use catalog::WorkflowCatalog;
pub use context::RunContext;
pub use engine::{RunOptions, WorkflowEngine, WorkflowRun};
pub use graph::StepGraph;
pub use log::LogRecorder;
pub use step::{StepDefaults, StepExecutor, StepSuccess};
pub use types::*;
