//! Provider Trait 定义
//!
//! 流式对话的统一接口。控制台的直连模式和 HTTP 服务都通过它访问上游，
//! 测试中可以替换为内存实现。

use super::types::{ChatCompletionsOptions, StreamingChatUpdate};
use crate::error::RelayError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Provider 增量流
pub type UpdateStream = BoxStream<'static, Result<StreamingChatUpdate, RelayError>>;

/// 流式对话 Provider
#[async_trait]
pub trait ChatCompletionsStreaming: Send + Sync {
    /// 发起流式请求
    ///
    /// 返回时上游已经接受请求（状态码成功）；之后的失败通过流中的 `Err` 传递。
    /// 取消令牌触发后，流产出 `RelayError::Cancelled` 并结束。
    async fn stream_chat(
        &self,
        options: &ChatCompletionsOptions,
        cancel: CancellationToken,
    ) -> Result<UpdateStream, RelayError>;

    /// Provider 名称，用于日志
    fn name(&self) -> &'static str;
}
