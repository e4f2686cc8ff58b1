//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock），供认知规划器调用

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{CompletionOptions, LlmClient, Message, Role};

use crate::config::LlmSection;

/// 按 [llm] 配置创建客户端；未知 provider 回退到 mock
pub fn create_client(section: &LlmSection) -> Arc<dyn LlmClient> {
    match section.provider.as_str() {
        "openai" => Arc::new(OpenAiClient::from_section(section)),
        "mock" => Arc::new(MockLlmClient::new()),
        other => {
            tracing::warn!("Unknown llm provider '{}', falling back to mock", other);
            Arc::new(MockLlmClient::new())
        }
    }
}
