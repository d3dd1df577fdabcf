//! 交互式控制台

use anyhow::Context;
use chat_relay_lib::config::{config_path_from_args, RelayConfig};
use chat_relay_lib::console::ConsoleApp;
use chat_relay_lib::logger::{self, LogTarget};
use chat_relay_lib::proxy::HttpClientFactory;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args(std::env::args().skip(1));
    let config = RelayConfig::load(config_path.as_deref()).context("加载配置失败")?;

    // stdout 用于输出 token 流
    logger::init(&config.logging, LogTarget::Stderr);
    config.log_sources();

    let http = HttpClientFactory::from_config(&config.http)
        .create_client()
        .context("创建 HTTP 客户端失败")?;

    let app = ConsoleApp::new(&config, http).with_interrupt_handling(true);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    app.run(stdin, &mut stdout).await?;

    Ok(())
}
