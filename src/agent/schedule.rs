//! cron 计划：校验与到期匹配
//!
//! 标准 5 字段表达式（分 时 日 月 周），按分钟粒度匹配：检查时刻的秒与纳秒会被截掉。
//! 不做去重：同一分钟内被检查两次的计划会触发两次。

use chrono::{DateTime, Timelike, Utc};
use croner::Cron;

use crate::agent::types::ScheduledWorkflow;
use crate::core::AgentError;

/// 解析 cron 表达式；非法时返回 InvalidCronExpression
pub fn parse_cron(expr: &str) -> Result<Cron, AgentError> {
    Cron::new(expr).parse().map_err(|e| AgentError::InvalidCronExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// 表达式是否在给定时刻（所在分钟）匹配；非法表达式视为不匹配
pub fn matches_at(expr: &str, at: DateTime<Utc>) -> bool {
    let Ok(cron) = parse_cron(expr) else {
        return false;
    };
    let minute = at.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(at);
    cron.is_time_matching(&minute).unwrap_or(false)
}

/// 返回在给定时刻到期的计划
pub fn due_workflows(entries: &[ScheduledWorkflow], at: DateTime<Utc>) -> Vec<ScheduledWorkflow> {
    entries
        .iter()
        .filter(|entry| matches_at(&entry.cron, at))
        .cloned()
        .collect()
}

/// 校验后把计划插到最前面；非法表达式不修改列表
pub fn add_schedule(entries: &mut Vec<ScheduledWorkflow>, entry: ScheduledWorkflow) -> Result<(), AgentError> {
    parse_cron(&entry.cron)?;
    entries.insert(0, entry);
    Ok(())
}

/// 删除所有同名处理器的计划；返回删除条数
pub fn remove_schedule(entries: &mut Vec<ScheduledWorkflow>, handler: &str) -> usize {
    let before = entries.len();
    entries.retain(|entry| entry.handler != handler);
    before - entries.len()
}
