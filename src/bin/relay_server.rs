//! SSE 中继服务

use anyhow::Context;
use chat_relay_lib::config::{config_path_from_args, RelayConfig};
use chat_relay_lib::logger::{self, LogTarget};
use chat_relay_lib::proxy::HttpClientFactory;
use chat_relay_lib::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args(std::env::args().skip(1));
    let config = RelayConfig::load(config_path.as_deref()).context("加载配置失败")?;

    logger::init(&config.logging, LogTarget::Stdout);
    config.log_sources();
    tracing::info!("[SERVER] 启动 chat-relay 服务");

    let http = HttpClientFactory::from_config(&config.http)
        .create_client()
        .context("创建 HTTP 客户端失败")?;

    let state = AppState::from_config(&config, http);
    server::serve(&config.server, state).await
}
