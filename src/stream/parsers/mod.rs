//! 流解析器
//!
//! - `sse_line`: SSE 行分帧与解码
//! - `records`: 上游增量到 `ChunkRecord` 的转换

mod records;
mod sse_line;

pub use records::{ChatUpdateParser, RelayPayloadParser};
pub use sse_line::{
    bytes_from_chunks, decode_sse_stream, MalformedChunkPolicy, SseLine, SseLineBuffer,
    SseLineParser, DATA_PREFIX, DONE_LINE,
};
