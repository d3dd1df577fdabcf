//! 流式中继层
//!
//! ```text
//! 上游数据源 ──> [Parser] ──> ChunkRecord ──> [Sink] ──> 控制台 / SSE 响应
//!
//! 例如：
//! Provider 增量     ──> [ChatUpdateParser]   ──> ChunkRecord ──> [ConsoleSink]
//! 中继 API SSE 响应 ──> [RelayPayloadParser] ──> ChunkRecord ──> [ConsoleSink]
//! Provider 增量     ──> [ChatUpdateParser]   ──> ChunkRecord ──> [SseSink]
//! ```
//!
//! # 模块结构
//!
//! - `chunk`: 数据块与线上格式
//! - `parsers`: SSE 行解析与数据块构建
//! - `sources`: 上游数据源
//! - `sinks`: 下游输出端
//! - `pipeline`: 状态机与取消处理

pub mod chunk;
pub mod parsers;
pub mod pipeline;
pub mod sinks;
pub mod sources;


pub use chunk::{ChatRole, ChunkPayload, ChunkRecord};
pub use parsers::MalformedChunkPolicy;
pub use pipeline::{PipelineState, RelayOutcome, RelayPipeline};
pub use sinks::{ChunkSink, ConsoleSink, SseEncoder, SseSink};
pub use sources::{open_provider_source, ChunkStream, RelaySource};
