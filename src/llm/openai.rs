//! OpenAI 兼容端点上的规划模型
//!
//! `[llm] provider = "openai"` 时由 `create_client` 构造；密钥只从 OPENAI_API_KEY 读取。

use std::sync::atomic::{AtomicU64, Ordering};

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{CompletionOptions, LlmClient, Message, Role};

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl OpenAiClient {
    pub fn from_section(section: &LlmSection) -> Self {
        let mut config = OpenAIConfig::new();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config = config.with_api_key(key);
        } else {
            tracing::warn!("OPENAI_API_KEY not set, planner requests will be rejected upstream");
        }
        if let Some(url) = &section.base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: section.model.clone(),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        }
    }
}

fn request_message(message: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default().content(content).build()?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default().content(content).build()?,
        ),
        Role::Assistant => ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default().content(content).build()?,
        ),
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, String> {
        let messages = messages
            .iter()
            .map(request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;

        let model = options.model.as_deref().unwrap_or(&self.model);
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages);
        if let Some(temperature) = options.temperature {
            args.temperature(temperature);
        }
        let request = args.build().map_err(|e| e.to_string())?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            tracing::warn!(model = %model, error = %e, "chat completion failed");
            e.to_string()
        })?;

        if let Some(usage) = &response.usage {
            self.prompt_tokens.fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.completion_tokens
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        }

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}
