//! 动作处理器：外部协作者（HTTP、交易、聊天平台等）的统一边界

pub mod echo;
pub mod executor;
pub mod http;
pub mod registry;
pub mod schema;

pub use echo::EchoHandler;
pub use executor::HandlerExecutor;
pub use http::HttpRequestHandler;
pub use registry::{ActionHandler, HandlerRegistry};
pub use schema::action_plan_schema_json;
