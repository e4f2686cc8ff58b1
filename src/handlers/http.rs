//! HTTP 请求处理器：通用 JSON 调用
//!
//! 交易所、聊天平台、区块浏览器等外部服务都可以先用它接入；签名与专用参数不在这里处理。

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;

use crate::handlers::ActionHandler;

#[derive(Debug, Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// HTTP 处理器：输入 {url, method?, headers?, body?}，输出 {status, body}
pub struct HttpRequestHandler {
    client: Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpRequestHandler {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Call an HTTP endpoint. Args: {\"url\": \"...\", \"method\": \"GET|POST|...\", \"headers\": {}, \"body\": {}}"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string" },
                "headers": { "type": "object" },
                "body": {}
            },
            "required": ["url"]
        })
    }

    async fn handle(&self, input: Value) -> Result<Value, String> {
        let req: HttpRequestInput =
            serde_json::from_value(input).map_err(|e| format!("Invalid input: {}", e))?;
        let method = Method::from_bytes(req.method.to_uppercase().as_bytes())
            .map_err(|e| format!("Invalid method {}: {}", req.method, e))?;

        let mut builder = self.client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if status >= 400 {
            return Err(format!("HTTP {}: {}", status, body));
        }
        Ok(serde_json::json!({ "status": status, "body": body }))
    }
}
