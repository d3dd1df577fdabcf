//! 下游输出端
//!
//! - `console`: 逐 chunk 写入终端
//! - `sse`: 编码为 SSE 事件写入 HTTP 响应体

mod console;
mod sse;

pub use console::ConsoleSink;
pub use sse::{SseEncoder, SseSink};

use crate::error::RelayError;
use crate::stream::chunk::ChunkRecord;
use async_trait::async_trait;

/// 输出端接口
///
/// 管道按顺序调用：若干次 `send_chunk`，然后 `finish`（正常结束）或
/// `fail`（出错）。取消时两者都不调用。
#[async_trait]
pub trait ChunkSink: Send {
    /// 结束前是否需要经过 Draining 状态（写入终止标记）
    fn drains(&self) -> bool {
        false
    }

    async fn send_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), RelayError>;

    async fn finish(&mut self) -> Result<(), RelayError>;

    /// 流中途出错
    async fn fail(&mut self, _error: &RelayError) -> Result<(), RelayError> {
        Ok(())
    }
}
