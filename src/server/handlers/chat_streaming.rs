//! `POST /ChatStreaming` 处理器
//!
//! 请求体是用户消息（JSON 字符串或纯文本），响应是 SSE 流：
//!
//! ```text
//! data: {"id":"…","role":"assistant","createdDateTime":"…"}
//!
//! data: {"id":"…","content":"…","createdDateTime":"…"}
//!
//! data: [DONE]
//!
//! ```
//!
//! 上游流在返回响应头之前打开，因此打开阶段的错误可以用状态码和 JSON 返回。
//! 之后管道在后台任务中运行，经由内存管道写入响应体；客户端断开时响应体被丢弃，
//! 取消令牌随之触发。

use crate::error::RelayError;
use crate::server::AppState;
use crate::stream::{open_provider_source, RelayOutcome, RelayPipeline, SseSink};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 后台管道与响应体之间的缓冲大小
const PIPE_CAPACITY: usize = 16 * 1024;

/// 处理流式对话请求
pub async fn chat_streaming(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let user_message = match decode_message_body(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("[CHAT_STREAMING] {} 请求无效: {}", request_id, e);
            return error_response(&e);
        }
    };

    let upstream = match &state.upstream {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!("[CHAT_STREAMING] {} 上游未配置: {}", request_id, e);
            return error_response(e);
        }
    };

    tracing::info!(
        "[CHAT_STREAMING] {} 收到请求: deployment={}, message_len={}",
        request_id,
        upstream.deployment(),
        user_message.chars().count()
    );

    let cancel = CancellationToken::new();
    let options = upstream.options(&state.system_prompt, &user_message);
    let source = match open_provider_source(upstream.provider(), &options, cancel.clone()).await {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("[CHAT_STREAMING] {} 打开上游流失败: {}", request_id, e);
            return error_response(&e);
        }
    };

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let emit_error_events = state.emit_error_events;
    let task_cancel = cancel.clone();
    let task_id = request_id.clone();

    tokio::spawn(async move {
        let mut sink = SseSink::new(writer).with_error_events(emit_error_events);
        let mut pipeline = RelayPipeline::new(format!("chat-streaming {}", task_id));

        match pipeline
            .run(async move { Ok(source) }, &mut sink, &task_cancel)
            .await
        {
            Ok(RelayOutcome::Completed { chunks }) => {
                tracing::info!("server - response ended.");
                tracing::debug!("[CHAT_STREAMING] {} 完成: chunks={}", task_id, chunks);
            }
            Ok(RelayOutcome::Cancelled { chunks }) => {
                tracing::info!(
                    "[CHAT_STREAMING] {} 客户端断开，已转发 {} 个 chunk",
                    task_id,
                    chunks
                );
            }
            Err(e) => {
                tracing::error!("[CHAT_STREAMING] {} 流中断: {}", task_id, e);
            }
        }
    });

    tracing::info!("server - response started.");

    // 响应体被丢弃（客户端断开）时 guard 触发取消
    let guard = cancel.drop_guard();
    let body_stream = async_stream::stream! {
        let _guard = guard;
        let mut reader = ReaderStream::new(reader);
        while let Some(chunk) = reader.next().await {
            yield chunk;
        }
    };

    sse_response(Body::from_stream(body_stream))
}

/// 解析请求体中的用户消息
///
/// 优先按 JSON 字符串解析（`"こんにちは"`），否则按 UTF-8 纯文本处理。
pub fn decode_message_body(body: &[u8]) -> Result<String, RelayError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RelayError::InvalidRequest("请求体不是有效的 UTF-8".to_string()))?;

    let message = match serde_json::from_str::<String>(text) {
        Ok(message) => message,
        Err(_) => text.to_string(),
    };

    if message.trim().is_empty() {
        return Err(RelayError::InvalidRequest("用户消息不能为空".to_string()));
    }
    Ok(message)
}

/// 构建 SSE 响应
fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(
                    serde_json::json!({"error": {"message": "Failed to build streaming response"}}),
                ),
            )
                .into_response()
        })
}

/// 构建 JSON 错误响应
pub fn error_response(error: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_json())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_string_body() {
        assert_eq!(decode_message_body("\"こんにちは\"".as_bytes()).unwrap(), "こんにちは");
        // 转义字符按 JSON 规则还原
        assert_eq!(decode_message_body(br#""a\nb""#).unwrap(), "a\nb");
    }

    #[test]
    fn test_decode_raw_text_body() {
        assert_eq!(decode_message_body("こんにちは".as_bytes()).unwrap(), "こんにちは");
        assert_eq!(decode_message_body(b"{\"x\":1}").unwrap(), "{\"x\":1}");
    }

    #[test]
    fn test_decode_empty_body() {
        assert!(matches!(
            decode_message_body(b""),
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_message_body(b"\"  \""),
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(matches!(
            decode_message_body(&[0xff, 0xfe]),
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&RelayError::ConfigurationMissing("upstream.api_key".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = error_response(&RelayError::Cancelled);
        assert_eq!(response.status().as_u16(), 499);
    }
}
