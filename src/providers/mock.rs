//! 测试用 Provider

use super::traits::{ChatCompletionsStreaming, UpdateStream};
use super::types::{ChatCompletionsOptions, StreamingChatUpdate};
use super::UpstreamTarget;
use crate::error::RelayError;
use crate::stream::chunk::ChatRole;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// 按脚本返回更新的 Provider
#[derive(Debug, Default)]
pub(crate) struct ScriptedProvider {
    items: Vec<Result<StreamingChatUpdate, RelayError>>,
    open_error: Option<RelayError>,
    /// 脚本结束后保持连接，直到取消
    hold_open: bool,
    requests: Mutex<Vec<ChatCompletionsOptions>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedProvider {
    pub fn new(items: Vec<Result<StreamingChatUpdate, RelayError>>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// 角色更新 + 每段文本一个更新
    pub fn replying(parts: &[&str]) -> Self {
        let mut items = vec![Ok(StreamingChatUpdate {
            role: Some(ChatRole::Assistant),
            ..Default::default()
        })];
        items.extend(parts.iter().map(|p| {
            Ok(StreamingChatUpdate {
                content_update: Some(p.to_string()),
                ..Default::default()
            })
        }));
        Self::new(items)
    }

    pub fn failing(error: RelayError) -> Self {
        Self {
            open_error: Some(error),
            ..Default::default()
        }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn requests(&self) -> Vec<ChatCompletionsOptions> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 最近一次请求收到的取消令牌
    pub fn last_cancel_token(&self) -> Option<CancellationToken> {
        self.tokens.lock().ok().and_then(|t| t.last().cloned())
    }

    pub fn into_target(self) -> (Arc<Self>, UpstreamTarget) {
        let provider = Arc::new(self);
        let target = UpstreamTarget::new(provider.clone(), "test-deployment");
        (provider, target)
    }
}

#[async_trait]
impl ChatCompletionsStreaming for ScriptedProvider {
    async fn stream_chat(
        &self,
        options: &ChatCompletionsOptions,
        cancel: CancellationToken,
    ) -> Result<UpdateStream, RelayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(options.clone());
        }
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.push(cancel.clone());
        }
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let scripted = futures::stream::iter(self.items.clone());
        if self.hold_open {
            let stream = scripted
                .chain(futures::stream::pending())
                .take_until(cancel.cancelled_owned());
            Ok(stream.boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
