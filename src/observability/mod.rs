//! 可观测性：tracing 订阅器（RUST_LOG 可覆盖，默认 info）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = match "info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    // 测试或宿主程序可能已经安装过订阅器
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
