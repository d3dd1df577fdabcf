//! 中继管道
//!
//! 把一个数据源接到一个输出端上，并维护请求的生命周期状态：
//!
//! ```text
//! Idle ──> Requesting ──> Streaming ──> Draining ──> Closed
//!              │              │  └──────────────────────^  （不需要 Draining 的输出端）
//!              │              │              │
//!              └──────────────┴──────────────┴──> Errored / Cancelled
//! ```
//!
//! 取消令牌在每次读取上游和每次写入下游之前检查；取消后不再写出任何 chunk，
//! 数据源被丢弃，上游连接随之释放。

use crate::error::RelayError;
use crate::stream::sinks::ChunkSink;
use crate::stream::sources::ChunkStream;
use futures::StreamExt;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 管道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// 已发出请求，等待上游响应头
    Requesting,
    Streaming,
    /// 上游已结束，正在写出终止标记
    Draining,
    Closed,
    Errored,
    Cancelled,
}

impl PipelineState {
    /// 状态迁移是否合法
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Requesting)
                | (Requesting, Streaming)
                | (Requesting, Errored)
                | (Requesting, Cancelled)
                | (Streaming, Draining)
                | (Streaming, Closed)
                | (Streaming, Errored)
                | (Streaming, Cancelled)
                | (Draining, Closed)
                | (Draining, Errored)
                | (Draining, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Closed | PipelineState::Errored | PipelineState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Requesting => "requesting",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Closed => "closed",
            PipelineState::Errored => "errored",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 正常结束的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// 上游正常结束，已写出的 chunk 数
    Completed { chunks: usize },
    /// 被取消或下游断开
    Cancelled { chunks: usize },
}

impl RelayOutcome {
    pub fn chunks(&self) -> usize {
        match self {
            RelayOutcome::Completed { chunks } | RelayOutcome::Cancelled { chunks } => *chunks,
        }
    }
}

/// 中继管道（一次请求一个实例）
#[derive(Debug)]
pub struct RelayPipeline {
    label: String,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl RelayPipeline {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 经历过的所有状态
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "非法状态迁移: {} -> {}",
            self.state,
            next
        );
        debug!("[PIPELINE] {}: {} -> {}", self.label, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// 运行管道
    ///
    /// `open` 负责发出请求并返回数据源；它在 Requesting 状态下执行。
    /// 出错时先调用 `sink.fail`，再返回错误；取消和下游断开返回
    /// `Ok(RelayOutcome::Cancelled)`。
    pub async fn run<F, S>(
        &mut self,
        open: F,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError>
    where
        F: Future<Output = Result<ChunkStream, RelayError>>,
        S: ChunkSink + ?Sized,
    {
        if self.state != PipelineState::Idle {
            return Err(RelayError::InvalidRequest(format!(
                "管道已处于 {} 状态",
                self.state
            )));
        }
        self.transition(PipelineState::Requesting);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            result = open => result,
        };
        let mut source = match opened {
            Ok(source) => source,
            Err(e) => return self.abort(e, sink, 0).await,
        };
        self.transition(PipelineState::Streaming);

        let mut chunks = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(RelayError::Cancelled)),
                item = source.next() => item,
            };

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if cancel.is_cancelled() {
                        return self.abort(RelayError::Cancelled, sink, chunks).await;
                    }
                    if let Err(e) = sink.send_chunk(&chunk).await {
                        return self.abort(e, sink, chunks).await;
                    }
                    chunks += 1;
                }
                Some(Err(e)) => return self.abort(e, sink, chunks).await,
            }
        }
        drop(source);

        if sink.drains() {
            self.transition(PipelineState::Draining);
        }
        if let Err(e) = sink.finish().await {
            return self.abort(e, sink, chunks).await;
        }
        self.transition(PipelineState::Closed);
        debug!("[PIPELINE] {} 完成: chunks={}", self.label, chunks);
        Ok(RelayOutcome::Completed { chunks })
    }

    async fn abort<S>(
        &mut self,
        error: RelayError,
        sink: &mut S,
        chunks: usize,
    ) -> Result<RelayOutcome, RelayError>
    where
        S: ChunkSink + ?Sized,
    {
        if error.is_disconnect() {
            self.transition(PipelineState::Cancelled);
            info!(
                "[PIPELINE] {} 已取消: {} (已转发 {} 个 chunk)",
                self.label, error, chunks
            );
            return Ok(RelayOutcome::Cancelled { chunks });
        }

        self.transition(PipelineState::Errored);
        error!("[PIPELINE] {} 失败: {}", self.label, error);
        if let Err(e) = sink.fail(&error).await {
            warn!("[PIPELINE] {} 写出错误信息失败: {}", self.label, e);
        }
        Err(error)
    }
}
