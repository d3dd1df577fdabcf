//! 控制台程序
//!
//! 交互循环：
//!
//! ```text
//! Enter the command number and press the enter key.
//! 1: Chat completions streaming (direct), 2: Chat completions streaming via relay API
//! > 1
//!
//! assistant:
//! ……
//! ```
//!
//! - `1`: 直接调用 Provider
//! - `2`: 通过中继 API（`POST /ChatStreaming`）
//! - `exit`: 退出
//!
//! 每条命令执行完后停顿一段时间并输出空行。命令失败只打印错误，回到提示符。

use crate::config::{ConsoleConfig, PromptConfig, RelayConfig};
use crate::error::RelayError;
use crate::providers::UpstreamTarget;
use crate::stream::{
    open_provider_source, ConsoleSink, RelayOutcome, RelayPipeline, RelaySource,
};
use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

const PROMPT_HEADER: &str = "Enter the command number and press the enter key.\n\
1: Chat completions streaming (direct), 2: Chat completions streaming via relay API\n";

const PROMPT: &str = "> ";

/// 控制台命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// 直接调用 Provider
    Direct,
    /// 通过中继 API
    Relay,
    Exit,
    Invalid,
}

impl ConsoleCommand {
    /// 解析一行输入；空行返回 `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line.to_lowercase().as_str() {
            "1" => ConsoleCommand::Direct,
            "2" => ConsoleCommand::Relay,
            "exit" => ConsoleCommand::Exit,
            _ => ConsoleCommand::Invalid,
        })
    }
}

/// 控制台程序
///
/// 缺失的配置不会阻止程序启动，只会让对应的命令失败。
pub struct ConsoleApp {
    upstream: Result<UpstreamTarget, RelayError>,
    relay: Result<RelaySource, RelayError>,
    prompts: PromptConfig,
    console: ConsoleConfig,
    interrupt_handling: bool,
}

impl ConsoleApp {
    pub fn new(config: &RelayConfig, http: Client) -> Self {
        let upstream = UpstreamTarget::from_config(config, http.clone());
        if let Err(e) = &upstream {
            warn!("[CONSOLE] 命令 1 不可用: {}", e);
        }

        let relay = config
            .require_relay_endpoint()
            .and_then(|endpoint| RelaySource::new(http, endpoint))
            .map(|source| source.with_policy(config.stream.malformed_chunk_policy));
        if let Err(e) = &relay {
            warn!("[CONSOLE] 命令 2 不可用: {}", e);
        }

        Self::from_parts(upstream, relay, config.prompts.clone(), config.console.clone())
    }

    pub fn from_parts(
        upstream: Result<UpstreamTarget, RelayError>,
        relay: Result<RelaySource, RelayError>,
        prompts: PromptConfig,
        console: ConsoleConfig,
    ) -> Self {
        Self {
            upstream,
            relay,
            prompts,
            console,
            interrupt_handling: false,
        }
    }

    /// 是否监听 Ctrl+C
    ///
    /// 开启后，流式输出期间按 Ctrl+C 只取消当前请求；在提示符处按 Ctrl+C 退出。
    pub fn with_interrupt_handling(mut self, enabled: bool) -> Self {
        self.interrupt_handling = enabled;
        self
    }

    /// 运行交互循环，直到 `exit`、输入结束或在提示符处中断
    pub async fn run<R, W>(&self, input: R, output: &mut W) -> Result<(), RelayError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = input.lines();

        loop {
            output.write_all(PROMPT_HEADER.as_bytes()).await?;
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let line = if self.interrupt_handling {
                tokio::select! {
                    line = lines.next_line() => line?,
                    _ = tokio::signal::ctrl_c() => {
                        info!("[CONSOLE] 收到中断信号，退出");
                        None
                    }
                }
            } else {
                lines.next_line().await?
            };

            let Some(line) = line else {
                break;
            };

            let result = match ConsoleCommand::parse(&line) {
                None => continue,
                Some(ConsoleCommand::Exit) => break,
                Some(ConsoleCommand::Direct) => self.run_direct(output).await.map(Some),
                Some(ConsoleCommand::Relay) => self.run_relay(output).await.map(Some),
                Some(ConsoleCommand::Invalid) => {
                    output.write_all(b"invalid command number.\n").await?;
                    Ok(None)
                }
            };

            match result {
                Ok(Some(RelayOutcome::Cancelled { chunks })) => {
                    output.write_all(b"\ncancelled.\n").await?;
                    info!("[CONSOLE] 请求已取消，已输出 {} 个 chunk", chunks);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[CONSOLE] 命令执行失败: {}", e);
                    output.write_all(format!("error: {}\n", e).as_bytes()).await?;
                }
            }

            let pause = self.console.command_pause();
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        Ok(())
    }

    /// 命令 1：直接调用 Provider
    pub async fn run_direct<W>(&self, output: &mut W) -> Result<RelayOutcome, RelayError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let upstream = self.upstream.as_ref().map_err(Clone::clone)?;
        let options = upstream.options(&self.prompts.system, &self.prompts.user);

        let cancel = CancellationToken::new();
        let _watch = self.watch_interrupt(&cancel);
        let mut sink = ConsoleSink::new(output).with_delay(self.console.output_delay());
        let mut pipeline = RelayPipeline::new("console-direct");

        pipeline
            .run(
                open_provider_source(upstream.provider(), &options, cancel.clone()),
                &mut sink,
                &cancel,
            )
            .await
    }

    /// 命令 2：通过中继 API
    pub async fn run_relay<W>(&self, output: &mut W) -> Result<RelayOutcome, RelayError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let relay = self.relay.as_ref().map_err(Clone::clone)?;

        let cancel = CancellationToken::new();
        let _watch = self.watch_interrupt(&cancel);
        let mut sink = ConsoleSink::new(output).with_delay(self.console.output_delay());
        let mut pipeline = RelayPipeline::new("console-relay");

        pipeline
            .run(
                relay.open(&self.prompts.user, cancel.clone()),
                &mut sink,
                &cancel,
            )
            .await
    }

    /// 在当前命令执行期间监听 Ctrl+C；返回的 guard 被丢弃时停止监听
    fn watch_interrupt(&self, cancel: &CancellationToken) -> Option<DropGuard> {
        if !self.interrupt_handling {
            return None;
        }

        let done = CancellationToken::new();
        let watch_done = done.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("[CONSOLE] 收到中断信号，取消当前请求");
                    cancel.cancel();
                }
                _ = watch_done.cancelled() => {}
            }
        });
        Some(done.drop_guard())
    }
}
