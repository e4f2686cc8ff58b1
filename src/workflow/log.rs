//! 执行日志记录器
//!
//! 并行分支共享同一个记录器；步骤记录在进入与结束时立即写入，与控制流无关，
//! 运行中途失败或整体超时时日志仍保留到失败点为止的完整记录。
//! 未开启 `generate_execution_log` 时记录器为空实现。

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::core::WorkflowError;
use crate::workflow::types::{
    ErrorRecord, ExecutionLog, RunStatus, StepRecord, StepSpec, StepStatus, WorkflowId,
};

#[derive(Clone, Default)]
pub struct LogRecorder {
    inner: Option<Arc<Mutex<ExecutionLog>>>,
}

impl LogRecorder {
    /// 不记录任何内容
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn enabled(workflow_id: WorkflowId, started_by: String, input: Value) -> Self {
        let log = ExecutionLog {
            workflow_id,
            started_by,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            input,
            output: None,
            error: None,
            steps: Vec::new(),
        };
        Self {
            inner: Some(Arc::new(Mutex::new(log))),
        }
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut ExecutionLog) -> R) -> Option<R> {
        let inner = self.inner.as_ref()?;
        let mut guard = inner.lock().ok()?;
        Some(f(&mut guard))
    }

    /// 新增一条 pending 记录，返回其下标
    pub fn begin_step(&self, spec: &StepSpec) -> Option<usize> {
        self.with_log(|log| {
            log.steps.push(StepRecord {
                id: spec.id.clone(),
                name: spec.name.clone(),
                started_at: Utc::now(),
                completed_at: None,
                input: None,
                output: None,
                error: None,
                status: StepStatus::Pending,
            });
            log.steps.len() - 1
        })
    }

    /// 输入已解析，开始调用处理器
    pub fn step_running(&self, index: Option<usize>, input: Option<Value>) {
        let Some(index) = index else { return };
        self.with_log(|log| {
            if let Some(record) = log.steps.get_mut(index) {
                record.status = StepStatus::Running;
                record.input = input;
            }
        });
    }

    pub fn step_completed(&self, index: Option<usize>, output: Option<Value>) {
        let Some(index) = index else { return };
        self.with_log(|log| {
            if let Some(record) = log.steps.get_mut(index) {
                record.status = StepStatus::Completed;
                record.completed_at = Some(Utc::now());
                record.output = output;
                record.error = None;
            }
        });
    }

    pub fn step_failed(&self, index: Option<usize>, error: &WorkflowError) {
        let Some(index) = index else { return };
        self.with_log(|log| {
            if let Some(record) = log.steps.get_mut(index) {
                record.status = StepStatus::Failed;
                record.completed_at = Some(Utc::now());
                record.error = Some(ErrorRecord::from(error));
            }
        });
    }

    /// 结束运行并返回日志快照
    pub fn finish(&self, result: &Result<Value, WorkflowError>) -> Option<ExecutionLog> {
        self.with_log(|log| {
            log.completed_at = Some(Utc::now());
            match result {
                Ok(output) => {
                    log.status = RunStatus::Completed;
                    log.output = Some(output.clone());
                }
                Err(e) => {
                    log.status = RunStatus::Failed;
                    log.error = Some(ErrorRecord::from(e));
                }
            }
            log.clone()
        })
    }
}
