//! Lux - Agent 与工作流框架
//!
//! 模块划分：
//! - **workflow**: 节点树工作流（顺序 / 并行 / 分支 / 步骤）、引用解析、重试与 fallback、执行日志
//! - **agent**: 单 Agent 进程、cron 计划、信号处理、监管者与协作网关
//! - **cognition**: 周期性认知循环（规划 + 有界并行执行）与学习
//! - **handlers**: 动作处理器抽象、注册表与带超时的执行器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **core**: 错误分类、分离任务调度、优雅关闭
//! - **config**: 应用配置加载（TOML + 环境变量）

pub mod agent;
pub mod cognition;
pub mod config;
pub mod core;
pub mod handlers;
pub mod llm;
pub mod observability;
pub mod workflow;
