//! Provider 请求与增量类型
//!
//! 对外暴露 SDK 风格的类型（`ChatCompletionsOptions` / `StreamingChatUpdate`），
//! 线上格式（`chat.completion.chunk`）只在本模块内部使用。

use crate::stream::chunk::ChatRole;
use serde::{Deserialize, Serialize};

/// 上游 Provider 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFlavor {
    /// Azure OpenAI（部署名在 URL 中，`api-key` 请求头）
    #[default]
    #[serde(alias = "azure")]
    AzureOpenAi,
    /// OpenAI 兼容 API（模型名在请求体中，Bearer 认证）
    #[serde(alias = "openai")]
    OpenAi,
}

impl ProviderFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFlavor::AzureOpenAi => "azure_open_ai",
            ProviderFlavor::OpenAi => "open_ai",
        }
    }
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// 流式对话请求参数
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionsOptions {
    /// 部署名或模型名
    pub deployment: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatCompletionsOptions {
    pub fn new(deployment: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Provider 返回的一次增量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingChatUpdate {
    /// 通常只在第一个更新中出现
    pub role: Option<ChatRole>,
    pub content_update: Option<String>,
    pub finish_reason: Option<String>,
}

// ============================================================================
// 线上格式
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    /// Azure 的模型由部署名决定，不在请求体中出现
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn streaming(options: &'a ChatCompletionsOptions, flavor: ProviderFlavor) -> Self {
        Self {
            model: match flavor {
                ProviderFlavor::AzureOpenAi => None,
                ProviderFlavor::OpenAi => Some(options.deployment.as_str()),
            },
            messages: &options.messages,
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub role: Option<ChatRole>,
    #[serde(default)]
    pub content: Option<String>,
}

impl From<ChatCompletionChunk> for StreamingChatUpdate {
    /// 只取第一个 choice；`choices` 为空的帧（如 Azure 的内容过滤结果）得到空更新
    fn from(chunk: ChatCompletionChunk) -> Self {
        match chunk.choices.into_iter().next() {
            Some(choice) => StreamingChatUpdate {
                role: choice.delta.role,
                content_update: choice.delta.content,
                finish_reason: choice.finish_reason,
            },
            None => StreamingChatUpdate::default(),
        }
    }
}
