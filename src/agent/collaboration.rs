//! 协作网关：授权并分派 Agent 之间的协议调用
//!
//! 授权条件全部满足才会分派：协议在来源的 allowed_protocols 中、目标在 trusted_peers 中、
//! delegate 需要 can_delegate、request_review 需要 can_request_help。
//! 协议处理器可插拔；默认实现返回 NotImplemented，与 Unauthorized 可区分。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::types::{Agent, Protocol};
use crate::core::CollaborationError;

#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    async fn handle(&self, source: &Agent, target: &Agent, payload: Value) -> Result<Value, CollaborationError>;
}

/// 占位处理器
pub struct NotImplementedProtocol(pub Protocol);

#[async_trait]
impl ProtocolHandler for NotImplementedProtocol {
    async fn handle(&self, _: &Agent, _: &Agent, _: Value) -> Result<Value, CollaborationError> {
        Err(CollaborationError::NotImplemented(self.0.to_string()))
    }
}

pub struct CollaborationGate {
    handlers: HashMap<Protocol, Arc<dyn ProtocolHandler>>,
}

impl Default for CollaborationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CollaborationGate {
    /// 四种协议都注册为占位处理器
    pub fn new() -> Self {
        let handlers = Protocol::ALL
            .into_iter()
            .map(|p| (p, Arc::new(NotImplementedProtocol(p)) as Arc<dyn ProtocolHandler>))
            .collect();
        Self { handlers }
    }

    pub fn with_handler(mut self, protocol: Protocol, handler: Arc<dyn ProtocolHandler>) -> Self {
        self.handlers.insert(protocol, handler);
        self
    }

    pub fn authorize(source: &Agent, target_id: &str, protocol: Protocol) -> Result<(), CollaborationError> {
        let config = &source.collaboration;
        if !config.allowed_protocols.contains(&protocol) {
            return Err(CollaborationError::Unauthorized(format!(
                "protocol '{}' not allowed for {}",
                protocol, source.id
            )));
        }
        if !config.trusted_peers.iter().any(|peer| peer == target_id) {
            return Err(CollaborationError::Unauthorized(format!(
                "{} does not trust {}",
                source.id, target_id
            )));
        }
        match protocol {
            Protocol::Delegate if !config.can_delegate => Err(CollaborationError::Unauthorized(format!(
                "{} cannot delegate",
                source.id
            ))),
            Protocol::RequestReview if !config.can_request_help => Err(CollaborationError::Unauthorized(
                format!("{} cannot request help", source.id),
            )),
            _ => Ok(()),
        }
    }

    pub async fn collaborate(
        &self,
        source: &Agent,
        target: &Agent,
        protocol: Protocol,
        payload: Value,
    ) -> Result<Value, CollaborationError> {
        if let Err(e) = Self::authorize(source, &target.id, protocol) {
            tracing::warn!(source = %source.id, target = %target.id, %protocol, error = %e, "collaboration refused");
            return Err(e);
        }
        let handler = self
            .handlers
            .get(&protocol)
            .ok_or_else(|| CollaborationError::NotImplemented(protocol.to_string()))?;
        tracing::info!(source = %source.id, target = %target.id, %protocol, "collaboration dispatched");
        handler.handle(source, target, payload).await
    }
}
