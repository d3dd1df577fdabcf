//! 控制台输出端
//!
//! 输出格式：
//!
//! ```text
//! \n{role}: \n      （收到角色时）
//! {content}          （不换行，逐段追加）
//! \n                 （结束时）
//! ```

use super::ChunkSink;
use crate::error::RelayError;
use crate::stream::chunk::ChunkRecord;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// 控制台输出端
///
/// 每个 chunk 写入后立即 flush，并可选地停顿一段时间，让输出呈现打字效果。
pub struct ConsoleSink<W> {
    writer: W,
    delay: Duration,
    forwarded: usize,
}

impl<W> ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            delay: Duration::ZERO,
            forwarded: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 已写出的 chunk 数
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ChunkSink for ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), RelayError> {
        if let Some(role) = chunk.role {
            self.writer
                .write_all(format!("\n{}: \n", role).as_bytes())
                .await?;
        }
        if let Some(content) = chunk.content() {
            self.writer.write_all(content.as_bytes()).await?;
        }
        self.writer.flush().await?;
        self.forwarded += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), RelayError> {
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn fail(&mut self, _error: &RelayError) -> Result<(), RelayError> {
        // 已输出的半行内容之后换行，错误信息由调用方打印
        self.finish().await
    }
}
