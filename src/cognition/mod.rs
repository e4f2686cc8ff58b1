//! 认知（Reflection）：周期性的规划-执行循环与从历史中学习

pub mod engine;
pub mod planner;
pub mod types;

pub use engine::{CognitionEngine, CycleFailure, CycleReport};
pub use planner::{parse_plan, LlmPlanner, Planner, StaticPlanner};
pub use types::{
    ActionOutcome, CognitionLimits, CognitionMetrics, CognitionPhase, CognitionState, CyclePlan,
    HistoryEntry, PlannedAction,
};
