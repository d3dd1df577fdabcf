//! 上游 LLM Provider
//!
//! - `traits`: 流式对话接口
//! - `types`: 请求参数与增量类型
//! - `openai`: OpenAI / Azure OpenAI 实现

mod openai;
mod traits;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use openai::OpenAiChatClient;
pub use traits::{ChatCompletionsStreaming, UpdateStream};
pub use types::{ChatCompletionsOptions, ChatMessage, ProviderFlavor, StreamingChatUpdate};

use crate::config::RelayConfig;
use crate::error::RelayError;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;

/// 已配置好的上游：Provider 实例 + 部署名 + 采样参数
#[derive(Clone)]
pub struct UpstreamTarget {
    provider: Arc<dyn ChatCompletionsStreaming>,
    deployment: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTarget")
            .field("provider", &self.provider.name())
            .field("deployment", &self.deployment)
            .finish()
    }
}

impl UpstreamTarget {
    pub fn new(provider: Arc<dyn ChatCompletionsStreaming>, deployment: impl Into<String>) -> Self {
        Self {
            provider,
            deployment: deployment.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// 从配置构建
    ///
    /// endpoint、api_key、model 任一缺失都返回 `ConfigurationMissing`。
    pub fn from_config(config: &RelayConfig, http: Client) -> Result<Self, RelayError> {
        let endpoint = config.require_endpoint()?;
        let api_key = config.require_api_key()?;
        let model = config.require_model()?;

        let client = OpenAiChatClient::new(http, config.upstream.flavor, endpoint, api_key)
            .with_api_version(config.upstream.api_version.clone())
            .with_policy(config.stream.malformed_chunk_policy);

        Ok(Self {
            provider: Arc::new(client),
            deployment: model.to_string(),
            temperature: config.upstream.temperature,
            max_tokens: config.upstream.max_tokens,
        })
    }

    pub fn provider(&self) -> &dyn ChatCompletionsStreaming {
        self.provider.as_ref()
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// 构建 system + user 两条消息的请求参数
    pub fn options(&self, system_prompt: &str, user_message: &str) -> ChatCompletionsOptions {
        ChatCompletionsOptions::new(self.deployment.clone())
            .with_message(ChatMessage::system(system_prompt))
            .with_message(ChatMessage::user(user_message))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}
