//! SSE 输出端
//!
//! 事件格式：
//!
//! ```text
//! data: {"id":"…","role":"assistant","createdDateTime":"…"}
//!
//! data: {"id":"…","content":"こんにちは","createdDateTime":"…"}
//!
//! data: [DONE]
//!
//! ```
//!
//! 每个事件写入后立即 flush，`data: [DONE]` 在整个响应中只出现一次。

use super::ChunkSink;
use crate::error::RelayError;
use crate::stream::chunk::ChunkRecord;
use crate::stream::parsers::DONE_LINE;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// SSE 事件编码器
#[derive(Debug, Default, Clone, Copy)]
pub struct SseEncoder;

impl SseEncoder {
    /// 编码单个 chunk
    ///
    /// `serde_json` 会转义字符串中的换行，因此负载始终为单行。
    pub fn encode_chunk(chunk: &ChunkRecord) -> Result<String, RelayError> {
        let json = serde_json::to_string(&chunk.to_payload())
            .map_err(|e| RelayError::Io(format!("序列化 chunk 失败: {}", e)))?;
        Ok(format!("data: {}\n\n", json))
    }

    /// 终止事件
    pub fn done() -> String {
        format!("{}\n\n", DONE_LINE)
    }

    /// 错误事件
    pub fn error(error: &RelayError) -> String {
        error.to_sse_error()
    }
}

/// SSE 输出端
pub struct SseSink<W> {
    writer: W,
    emit_error_events: bool,
    done_sent: bool,
    forwarded: usize,
}

impl<W> SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            emit_error_events: false,
            done_sent: false,
            forwarded: 0,
        }
    }

    /// 流中途出错时是否写入 `event: error`
    pub fn with_error_events(mut self, enabled: bool) -> Self {
        self.emit_error_events = enabled;
        self
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    pub fn done_sent(&self) -> bool {
        self.done_sent
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_event(&mut self, event: &str) -> Result<(), RelayError> {
        self.writer.write_all(event.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> ChunkSink for SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn drains(&self) -> bool {
        true
    }

    async fn send_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), RelayError> {
        if self.done_sent {
            warn!("[SSE_SINK] 终止事件之后收到 chunk，已忽略");
            return Ok(());
        }
        let event = SseEncoder::encode_chunk(chunk)?;
        self.write_event(&event).await?;
        self.forwarded += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), RelayError> {
        if self.done_sent {
            return Ok(());
        }
        self.done_sent = true;
        self.write_event(&SseEncoder::done()).await
    }

    async fn fail(&mut self, error: &RelayError) -> Result<(), RelayError> {
        if !self.emit_error_events || self.done_sent {
            return Ok(());
        }
        self.write_event(&SseEncoder::error(error)).await
    }
}
