//! 上游数据源
//!
//! 两种数据源都产出 `ChunkRecord` 流：
//!
//! - [`open_provider_source`]：直接调用 Provider 的流式接口
//! - [`RelaySource`]：POST 到中继 API，按 SSE 读取响应体

use crate::error::RelayError;
use crate::logger::format_headers;
use crate::providers::{ChatCompletionsOptions, ChatCompletionsStreaming};
use crate::stream::chunk::{ChunkPayload, ChunkRecord};
use crate::stream::parsers::{
    decode_sse_stream, ChatUpdateParser, MalformedChunkPolicy, RelayPayloadParser,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

/// 数据块流
pub type ChunkStream = BoxStream<'static, Result<ChunkRecord, RelayError>>;

/// 打开 Provider 直连数据源
///
/// 同一请求的所有 chunk 共享一个新生成的 ID。
pub async fn open_provider_source(
    provider: &dyn ChatCompletionsStreaming,
    options: &ChatCompletionsOptions,
    cancel: CancellationToken,
) -> Result<ChunkStream, RelayError> {
    let updates = provider.stream_chat(options, cancel).await?;
    let mut parser = ChatUpdateParser::new();
    debug!(
        "[SOURCE] {} 流已打开: response_id={}",
        provider.name(),
        parser.response_id()
    );

    Ok(updates
        .map(move |update| update.map(|u| parser.parse(&u)))
        .boxed())
}

/// 中继 API 数据源
#[derive(Debug, Clone)]
pub struct RelaySource {
    http: Client,
    endpoint: Url,
    policy: MalformedChunkPolicy,
}

impl RelaySource {
    /// 地址无法解析时返回 `Config` 错误
    pub fn new(http: Client, endpoint: &str) -> Result<Self, RelayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RelayError::Config(format!("无效的中继地址 {}: {}", endpoint, e)))?;
        Ok(Self {
            http,
            endpoint,
            policy: MalformedChunkPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: MalformedChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 发送用户消息并打开响应流
    ///
    /// 请求体是 JSON 字符串（`"こんにちは"`）。响应头到达后立即返回，
    /// 响应体按 SSE 逐行读取。
    pub async fn open(
        &self,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, RelayError> {
        let request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(ACCEPT, "text/event-stream")
            .json(user_message)
            .build()?;

        info!(
            "[RELAY_CLIENT] {} {} - headers: {}",
            request.method(),
            request.url(),
            format_headers(request.headers())
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = self.http.execute(request) => result?,
        };

        let status = response.status();
        info!(
            "[RELAY_CLIENT] status={} - headers: {}",
            status,
            format_headers(response.headers())
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("[RELAY_CLIENT] 请求失败: {} - {}", status, body);
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!("client - response started.");

        let mut parser = RelayPayloadParser::new();
        let payloads =
            decode_sse_stream::<ChunkPayload, _, _, _>(response.bytes_stream(), self.policy, cancel);

        let records = async_stream::stream! {
            futures::pin_mut!(payloads);
            while let Some(item) = payloads.next().await {
                let failed = item.is_err();
                yield item.map(|payload| parser.parse(payload));
                if failed {
                    return;
                }
            }
            info!("client - response ended.");
        };

        Ok(records.boxed())
    }
}
