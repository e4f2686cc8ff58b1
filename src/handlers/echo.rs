//! Echo 处理器（测试用）

use async_trait::async_trait;
use serde_json::Value;

use crate::handlers::ActionHandler;

/// Echo 处理器：原样返回输入
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input object back (for testing). Args: any JSON object"
    }

    async fn handle(&self, input: Value) -> Result<Value, String> {
        Ok(input)
    }
}
