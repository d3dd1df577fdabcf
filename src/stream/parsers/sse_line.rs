//! SSE 行解析器
//!
//! 将上游响应体按行切分，并把每一行解析为三种结果之一：
//!
//! ```text
//! ""                 -> Skip   （空行，继续读取）
//! "data: [DONE]"     -> Done   （流结束，不再读取任何后续行）
//! "data: {...}"      -> Data   （去掉前缀后按 JSON 解码）
//! 其他行             -> Skip
//! ```
//!
//! 解析器对负载类型是泛型的：中继格式 (`ChunkPayload`) 与 Provider 的
//! `chat.completion.chunk` 帧共用同一套分帧规则。

use crate::error::RelayError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 数据行前缀
pub const DATA_PREFIX: &str = "data: ";

/// 终止行
pub const DONE_LINE: &str = "data: [DONE]";

/// `data: ` 之后的内容无法解码时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedChunkPolicy {
    /// 返回 `MalformedChunk` 错误并结束当前流
    #[default]
    Fail,
    /// 记录警告后跳过该行，继续读取
    Skip,
}

/// 单行解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine<T> {
    /// 无内容
    Skip,
    /// 流结束
    Done,
    /// 解码后的负载
    Data(T),
}

/// SSE 行解析器
#[derive(Debug)]
pub struct SseLineParser<T> {
    policy: MalformedChunkPolicy,
    finished: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Default for SseLineParser<T> {
    fn default() -> Self {
        Self::with_policy(MalformedChunkPolicy::default())
    }
}

impl<T> SseLineParser<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MalformedChunkPolicy) -> Self {
        Self {
            policy,
            finished: false,
            _payload: PhantomData,
        }
    }

    /// 是否已经遇到终止行
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<T: DeserializeOwned> SseLineParser<T> {
    /// 解析一行（不含换行符）
    ///
    /// 遇到终止行之后，任何输入都返回 `Done`。
    pub fn parse_line(&mut self, line: &str) -> Result<SseLine<T>, RelayError> {
        self.parse_bytes(line.as_bytes())
    }

    /// 解析一行原始字节（不含换行符）
    ///
    /// 只有 `data: ` 行才做 UTF-8 解码；非法 UTF-8 与非法 JSON 一样按策略处理。
    pub fn parse_bytes(&mut self, line: &[u8]) -> Result<SseLine<T>, RelayError> {
        if self.finished {
            return Ok(SseLine::Done);
        }

        if line.is_empty() {
            return Ok(SseLine::Skip);
        }

        if line == DONE_LINE.as_bytes() {
            self.finished = true;
            return Ok(SseLine::Done);
        }

        let Some(body) = line.strip_prefix(DATA_PREFIX.as_bytes()) else {
            return Ok(SseLine::Skip);
        };

        let decoded = std::str::from_utf8(body)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<T>(text).map_err(|e| e.to_string()));

        match decoded {
            Ok(payload) => Ok(SseLine::Data(payload)),
            Err(reason) => {
                let line = String::from_utf8_lossy(line).into_owned();
                match self.policy {
                    MalformedChunkPolicy::Fail => Err(RelayError::MalformedChunk { line, reason }),
                    MalformedChunkPolicy::Skip => {
                        warn!("[SSE_PARSER] 跳过无法解析的数据行: {} - line: {}", reason, line);
                        Ok(SseLine::Skip)
                    }
                }
            }
        }
    }
}

/// 单行长度上限
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// 字节流行缓冲
///
/// 处理跨网络块的半行和 `\r\n` 行尾。输出原始字节行，由解析器负责解码，
/// 因此被切断的多字节 UTF-8 字符在拼回整行之前不会被解码。
#[derive(Debug)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    /// `buffer[..scanned]` 中已确认没有换行符
    scanned: usize,
    max_line: usize,
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    /// 追加字节，返回其中所有完整的行
    ///
    /// 任意一行（含尚未结束的半行）超过长度上限时返回 `MalformedChunk`。
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, RelayError> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(pos) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + pos;
            self.check_length(start, end)?;
            lines.push(strip_cr(&self.buffer[start..end]).to_vec());
            start = end + 1;
            search_from = start;
        }
        self.check_length(start, self.buffer.len())?;

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        Ok(lines)
    }

    /// 输入结束，取出最后一行未以换行结尾的内容
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(strip_cr(&rest).to_vec())
    }

    /// 缓冲中尚未组成完整行的字节数
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn check_length(&mut self, start: usize, end: usize) -> Result<(), RelayError> {
        if end - start <= self.max_line {
            return Ok(());
        }
        let head = &self.buffer[start..start + 64usize.min(end - start)];
        let err = RelayError::MalformedChunk {
            line: format!("{}...", String::from_utf8_lossy(head)),
            reason: format!("行长度超过上限 {} 字节", self.max_line),
        };
        self.buffer.clear();
        self.scanned = 0;
        Err(err)
    }
}

fn strip_cr(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// 将上游字节流解码为负载流
///
/// - 每次读取前检查取消令牌，取消时产出 `RelayError::Cancelled` 并停止读取
/// - 遇到 `data: [DONE]` 立即结束，丢弃字节流（连接随之释放）
/// - 读取或解码出错时产出错误并结束
pub fn decode_sse_stream<T, S, B, E>(
    byte_stream: S,
    policy: MalformedChunkPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<T, RelayError>> + Send
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<RelayError> + Send,
{
    async_stream::stream! {
        let mut byte_stream = Box::pin(byte_stream);
        let mut buffer = SseLineBuffer::new();
        let mut parser = SseLineParser::<T>::with_policy(policy);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = byte_stream.next() => Some(item),
            };

            let Some(item) = next else {
                yield Err(RelayError::Cancelled);
                return;
            };

            let (lines, at_eof) = match item {
                Some(Ok(bytes)) => match buffer.push(bytes.as_ref()) {
                    Ok(lines) => (lines, false),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                },
                Some(Err(e)) => {
                    yield Err(e.into());
                    return;
                }
                None => (buffer.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for line in lines {
                match parser.parse_bytes(&line) {
                    Ok(SseLine::Skip) => {}
                    Ok(SseLine::Done) => return,
                    Ok(SseLine::Data(payload)) => yield Ok(payload),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if at_eof {
                return;
            }
        }
    }
}

/// 将内存中的 SSE 文本切成字节块，便于测试与回放
pub fn bytes_from_chunks<I>(chunks: I) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    I: IntoIterator<Item = &'static str>,
    I::IntoIter: Send,
{
    futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::chunk::{ChatRole, ChunkPayload};
    use proptest::prelude::*;

    #[test]
    fn test_parse_role_only_line() {
        let mut parser = SseLineParser::<ChunkPayload>::new();
        let line = parser.parse_line(r#"data: {"role":"assistant"}"#).unwrap();
        match line {
            SseLine::Data(payload) => {
                assert_eq!(payload.role, Some(ChatRole::Assistant));
                assert!(payload.content.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_blank_and_unknown_lines_skip() {
        let mut parser = SseLineParser::<ChunkPayload>::new();
        assert_eq!(parser.parse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parser.parse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parser.parse_line("event: message").unwrap(), SseLine::Skip);
        assert!(!parser.is_finished());
    }

    #[test]
    fn test_done_is_sticky() {
        let mut parser = SseLineParser::<ChunkPayload>::new();
        assert_eq!(parser.parse_line(DONE_LINE).unwrap(), SseLine::Done);
        assert!(parser.is_finished());
        // 终止之后的任何行都不再解析
        assert_eq!(
            parser.parse_line(r#"data: {"content":"late"}"#).unwrap(),
            SseLine::Done
        );
        assert_eq!(parser.parse_line("data: not json").unwrap(), SseLine::Done);
    }

    #[test]
    fn test_malformed_fail_policy() {
        let mut parser = SseLineParser::<ChunkPayload>::new();
        let err = parser.parse_line("data: {not json").unwrap_err();
        match err {
            RelayError::MalformedChunk { line, .. } => assert_eq!(line, "data: {not json"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_skip_policy() {
        let mut parser = SseLineParser::<ChunkPayload>::with_policy(MalformedChunkPolicy::Skip);
        assert_eq!(parser.parse_line("data: {not json").unwrap(), SseLine::Skip);
        assert!(matches!(
            parser.parse_line(r#"data: {"content":"ok"}"#).unwrap(),
            SseLine::Data(_)
        ));
    }

    #[test]
    fn test_line_buffer_split_and_crlf() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"con").unwrap().is_empty());
        assert_eq!(buffer.pending(), 11);

        let lines = buffer.push(b"tent\":\"a\"}\r\n\r\ndata: [DO").unwrap();
        assert_eq!(lines, vec![br#"data: {"content":"a"}"#.to_vec(), Vec::new()]);

        assert!(buffer.push(b"NE]").unwrap().is_empty());
        assert_eq!(buffer.finish(), Some(DONE_LINE.as_bytes().to_vec()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_split_multibyte() {
        let text = "data: {\"content\":\"こんにちは\"}\n";
        let bytes = text.as_bytes();
        // 在「こ」的字节中间切断
        let cut = text.find('こ').unwrap() + 1;

        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(&bytes[..cut]).unwrap().is_empty());
        let lines = buffer.push(&bytes[cut..]).unwrap();
        assert_eq!(lines, vec![text.trim_end().as_bytes().to_vec()]);

        let mut parser = SseLineParser::<ChunkPayload>::new();
        match parser.parse_bytes(&lines[0]).unwrap() {
            SseLine::Data(payload) => assert_eq!(payload.content.as_deref(), Some("こんにちは")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_line_buffer_long_line_in_small_pieces() {
        let mut buffer = SseLineBuffer::new();
        let mut line = b"data: {\"content\":\"".to_vec();
        line.extend(std::iter::repeat(b'x').take(4096));
        line.extend_from_slice(b"\"}");

        for piece in line.chunks(3) {
            assert!(buffer.push(piece).unwrap().is_empty());
        }
        assert_eq!(buffer.pending(), line.len());
        assert_eq!(buffer.push(b"\n").unwrap(), vec![line]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_line_buffer_rejects_overlong_line() {
        let mut buffer = SseLineBuffer::with_max_line(16);
        assert!(buffer.push(b"data: 0123456789").unwrap().is_empty());

        let err = buffer.push(b"abc").unwrap_err();
        assert!(matches!(err, RelayError::MalformedChunk { .. }));
        assert_eq!(buffer.pending(), 0);

        // 一次性到达的完整长行同样拒绝
        let mut buffer = SseLineBuffer::with_max_line(16);
        assert!(buffer.push(b"data: 0123456789abc\n").is_err());
    }

    #[test]
    fn test_invalid_utf8_in_data_line() {
        let line = b"data: {\"content\":\"a\xff\xfeb\"}";

        let mut parser = SseLineParser::<ChunkPayload>::new();
        match parser.parse_bytes(line).unwrap_err() {
            RelayError::MalformedChunk { line, .. } => assert!(line.starts_with("data: ")),
            other => panic!("unexpected: {:?}", other),
        }

        let mut parser = SseLineParser::<ChunkPayload>::with_policy(MalformedChunkPolicy::Skip);
        assert_eq!(parser.parse_bytes(line).unwrap(), SseLine::Skip);

        // 非 data 行不解码，照常跳过
        let mut parser = SseLineParser::<ChunkPayload>::new();
        assert_eq!(parser.parse_bytes(b": \xff\xfe").unwrap(), SseLine::Skip);
    }

    #[tokio::test]
    async fn test_decode_stream_invalid_utf8() {
        let source = futures::stream::iter(vec![Ok::<_, RelayError>(Bytes::from_static(
            b"data: {\"content\":\"a\xff\xfeb\"}\n\ndata: {\"content\":\"c\"}\n\n",
        ))]);
        let items: Vec<_> = decode_sse_stream::<ChunkPayload, _, _, _>(
            source,
            MalformedChunkPolicy::Fail,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RelayError::MalformedChunk { .. })));

        let source = futures::stream::iter(vec![Ok::<_, RelayError>(Bytes::from_static(
            b"data: {\"content\":\"a\xff\xfeb\"}\n\ndata: {\"content\":\"c\"}\n\n",
        ))]);
        let items: Vec<_> = decode_sse_stream::<ChunkPayload, _, _, _>(
            source,
            MalformedChunkPolicy::Skip,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_decode_stream_stops_at_done() {
        let source = bytes_from_chunks([
            "data: {\"role\":\"assistant\"}\n\n",
            "\n\ndata: {\"content\":\"こん\"}\n\n",
            "data: [DONE]\n\n",
            "data: {\"content\":\"never\"}\n\n",
        ]);

        let payloads: Vec<_> = decode_sse_stream::<ChunkPayload, _, _, _>(
            source,
            MalformedChunkPolicy::Fail,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].as_ref().unwrap().content.as_deref(), Some("こん"));
    }

    #[tokio::test]
    async fn test_decode_stream_malformed_ends_stream() {
        let source = bytes_from_chunks([
            "data: {\"content\":\"a\"}\n\n",
            "data: oops\n\n",
            "data: {\"content\":\"b\"}\n\n",
        ]);

        let items: Vec<_> = decode_sse_stream::<ChunkPayload, _, _, _>(
            source,
            MalformedChunkPolicy::Fail,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RelayError::MalformedChunk { .. })));
    }

    #[tokio::test]
    async fn test_decode_stream_cancelled_before_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = bytes_from_chunks(["data: {\"content\":\"a\"}\n\n"]);

        let items: Vec<_> =
            decode_sse_stream::<ChunkPayload, _, _, _>(source, MalformedChunkPolicy::Fail, cancel)
                .collect()
                .await;

        assert_eq!(items, vec![Err(RelayError::Cancelled)]);
    }

    #[tokio::test]
    async fn test_decode_stream_unterminated_last_line() {
        let source = bytes_from_chunks(["data: {\"content\":\"tail\"}"]);
        let items: Vec<_> = decode_sse_stream::<ChunkPayload, _, _, _>(
            source,
            MalformedChunkPolicy::Fail,
            CancellationToken::new(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("tail"));
    }

    proptest! {
        /// 无论网络如何切块，得到的行序列都相同
        #[test]
        fn prop_line_buffer_chunking_invariant(
            contents in proptest::collection::vec("[a-zA-Zあ-ん0-9 ]{0,12}", 1..8),
            cuts in proptest::collection::vec(0usize..200, 0..6),
        ) {
            let mut text = String::new();
            for c in &contents {
                text.push_str(&format!("data: {{\"content\":\"{}\"}}\n\n", c));
            }
            let bytes = text.as_bytes();

            let mut whole = SseLineBuffer::new();
            let expected = whole.push(bytes).unwrap();

            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            points.sort_unstable();
            points.dedup();

            let mut chunked = SseLineBuffer::new();
            let mut actual = Vec::new();
            let mut last = 0;
            for p in points {
                actual.extend(chunked.push(&bytes[last..p]).unwrap());
                last = p;
            }
            actual.extend(chunked.push(&bytes[last..]).unwrap());

            prop_assert_eq!(actual, expected);
            prop_assert_eq!(chunked.finish(), None);
        }
    }
}
