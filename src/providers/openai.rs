//! OpenAI / Azure OpenAI 流式客户端
//!
//! 两种 API 共用 Chat Completions 协议，区别只在 URL 与认证方式：
//!
//! | flavor        | URL                                                              | 认证            |
//! |---------------|------------------------------------------------------------------|-----------------|
//! | AzureOpenAi   | `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=…` | `api-key` 请求头 |
//! | OpenAi        | `{endpoint}/chat/completions`                                    | Bearer          |

use super::traits::{ChatCompletionsStreaming, UpdateStream};
use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionsOptions, ProviderFlavor,
    StreamingChatUpdate,
};
use crate::error::RelayError;
use crate::stream::parsers::{decode_sse_stream, MalformedChunkPolicy};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// OpenAI 兼容的流式客户端
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    http: Client,
    flavor: ProviderFlavor,
    endpoint: String,
    api_key: String,
    api_version: String,
    policy: MalformedChunkPolicy,
}

impl OpenAiChatClient {
    pub fn new(
        http: Client,
        flavor: ProviderFlavor,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            flavor,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: "2024-02-01".to_string(),
            policy: MalformedChunkPolicy::default(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_policy(mut self, policy: MalformedChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 构建请求 URL
    pub fn url(&self, deployment: &str) -> String {
        match self.flavor {
            ProviderFlavor::AzureOpenAi => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, deployment, self.api_version
            ),
            ProviderFlavor::OpenAi => format!("{}/chat/completions", self.endpoint),
        }
    }
}

#[async_trait]
impl ChatCompletionsStreaming for OpenAiChatClient {
    async fn stream_chat(
        &self,
        options: &ChatCompletionsOptions,
        cancel: CancellationToken,
    ) -> Result<UpdateStream, RelayError> {
        let url = self.url(&options.deployment);
        info!(
            "[OPENAI] 发送流式请求: flavor={}, deployment={}, messages={}",
            self.flavor.as_str(),
            options.deployment,
            options.messages.len()
        );

        let request = ChatCompletionRequest::streaming(options, self.flavor);
        let builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(&request);
        let builder = match self.flavor {
            ProviderFlavor::AzureOpenAi => builder.header("api-key", &self.api_key),
            ProviderFlavor::OpenAi => builder.bearer_auth(&self.api_key),
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = builder.send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("[OPENAI] 请求失败: {} - {}", status, body);
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let updates = decode_sse_stream::<ChatCompletionChunk, _, _, _>(
            response.bytes_stream(),
            self.policy,
            cancel,
        )
        .map(|frame| frame.map(StreamingChatUpdate::from));

        Ok(updates.boxed())
    }

    fn name(&self) -> &'static str {
        match self.flavor {
            ProviderFlavor::AzureOpenAi => "azure-openai",
            ProviderFlavor::OpenAi => "openai",
        }
    }
}
