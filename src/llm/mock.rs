//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；脚本用完后返回一个不含动作的空计划。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, Message};

const EMPTY_PLAN: &str = r#"{"actions": [], "summary": "nothing to do"}"#;

/// Mock 客户端：依次弹出脚本中的回复，并记录收到的最后一条 User 消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last_prompt: Mutex<Option<String>>,
    last_options: Mutex<Option<CompletionOptions>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以固定回复序列创建
    pub fn scripted(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last_prompt: Mutex::new(None),
            last_options: Mutex::new(None),
        }
    }

    pub fn push_reply(&self, reply: Result<String, String>) {
        if let Ok(mut queue) = self.replies.lock() {
            queue.push_back(reply);
        }
    }

    /// 最近一次调用中最后一条 User 消息
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    pub fn last_options(&self) -> Option<CompletionOptions> {
        self.last_options.lock().ok().and_then(|o| o.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::llm::Role::User))
            .map(|m| m.content.clone());
        if let Ok(mut slot) = self.last_prompt.lock() {
            *slot = last_user;
        }
        if let Ok(mut slot) = self.last_options.lock() {
            *slot = Some(options.clone());
        }

        self.replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Ok(EMPTY_PLAN.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_then_empty_plan() {
        let mock = MockLlmClient::scripted([Ok("first".to_string())]);
        mock.push_reply(Err("down".to_string()));
        let msgs = [Message::system("sys"), Message::user("hello")];
        let opts = CompletionOptions::default();

        assert_eq!(mock.complete(&msgs, &opts).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs, &opts).await.unwrap_err(), "down");
        assert_eq!(mock.complete(&msgs, &opts).await.unwrap(), EMPTY_PLAN);
        assert_eq!(mock.last_prompt().as_deref(), Some("hello"));
        assert_eq!(mock.last_options(), Some(opts));
    }
}
