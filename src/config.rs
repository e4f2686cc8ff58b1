//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LUX__*` 覆盖（双下划线表示嵌套，如 `LUX__AGENT__SCHEDULE_CHECK_SECS=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub workflow: WorkflowSection,
    pub agent: AgentSection,
    pub supervisor: SupervisorSection,
    pub llm: LlmSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个关闭清理任务的超时（秒）
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl AppSection {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// [workflow] 段：步骤默认超时与重试间隔
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    /// 单步默认超时（毫秒），默认 5 分钟
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// 重试间隔（毫秒，固定间隔）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// 整个运行的默认超时；未设置则不限
    #[serde(default)]
    pub workflow_timeout_ms: Option<u64>,
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            workflow_timeout_ms: None,
        }
    }
}

/// [agent] 段：三个定时器、记忆与认知上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_cognition_interval_ms")]
    pub cognition_interval_ms: u64,
    /// 检查 cron 计划的周期（秒）
    #[serde(default = "default_schedule_check_secs")]
    pub schedule_check_secs: u64,
    /// 学习周期（秒）
    #[serde(default = "default_learn_interval_secs")]
    pub learn_interval_secs: u64,
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
    #[serde(default = "default_max_actions_per_cycle")]
    pub max_actions_per_cycle: usize,
    #[serde(default = "default_max_parallel_actions")]
    pub max_parallel_actions: usize,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
}

fn default_cognition_interval_ms() -> u64 {
    60_000
}

fn default_schedule_check_secs() -> u64 {
    60
}

fn default_learn_interval_secs() -> u64 {
    3600
}

fn default_max_memory_entries() -> usize {
    200
}

fn default_max_history() -> usize {
    50
}

fn default_max_patterns() -> usize {
    100
}

fn default_max_actions_per_cycle() -> usize {
    5
}

fn default_max_parallel_actions() -> usize {
    2
}

fn default_action_timeout_ms() -> u64 {
    30_000
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            cognition_interval_ms: default_cognition_interval_ms(),
            schedule_check_secs: default_schedule_check_secs(),
            learn_interval_secs: default_learn_interval_secs(),
            max_memory_entries: default_max_memory_entries(),
            max_history: default_max_history(),
            max_patterns: default_max_patterns(),
            max_actions_per_cycle: default_max_actions_per_cycle(),
            max_parallel_actions: default_max_parallel_actions(),
            action_timeout_ms: default_action_timeout_ms(),
        }
    }
}

impl AgentSection {
    pub fn schedule_check_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_check_secs.max(1))
    }

    pub fn learn_interval(&self) -> Duration {
        Duration::from_secs(self.learn_interval_secs.max(1))
    }
}

/// [supervisor] 段：重启强度（窗口内最多重启次数）
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window_secs() -> u64 {
    5
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window_secs(),
        }
    }
}

/// [llm] 段：认知循环使用的推理后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// mock / openai
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 LUX__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LUX__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LUX")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时回退默认配置并告警
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.workflow.step_timeout_ms, 300_000);
        assert_eq!(cfg.workflow.retry_backoff_ms, 1000);
        assert_eq!(cfg.agent.schedule_check_secs, 60);
        assert_eq!(cfg.agent.learn_interval_secs, 3600);
        assert_eq!(cfg.supervisor.max_restarts, 3);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.app.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lux.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[agent]\ncognition_interval_ms = 500\nmax_parallel_actions = 4\n").unwrap();
        writeln!(file, "[workflow]\nretry_backoff_ms = 10").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.cognition_interval_ms, 500);
        assert_eq!(cfg.agent.max_parallel_actions, 4);
        // 未出现的键保持默认
        assert_eq!(cfg.agent.max_actions_per_cycle, 5);
        assert_eq!(cfg.workflow.retry_backoff_ms, 10);
        assert_eq!(cfg.workflow.step_timeout_ms, 300_000);
    }
}
