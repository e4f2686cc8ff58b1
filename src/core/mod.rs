//! 核心层：错误分类、分离任务调度、优雅关闭

pub mod error;
pub mod shutdown;
pub mod task_scheduler;

pub use error::{AgentError, CognitionError, CollaborationError, WorkflowError};
pub use shutdown::{
    run_with_graceful_shutdown, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    StopAgents,
};
pub use task_scheduler::{TaskId, TaskKind, TaskScheduler};
