//! 流式数据块模型
//!
//! `ChunkRecord` 是解析器与输出端之间的统一中间表示：
//!
//! - 解析器（SSE 行 / Provider 更新）输出 `ChunkRecord`
//! - 输出端（控制台 / SSE 响应）消费 `ChunkRecord`
//!
//! 同一个响应的所有 chunk 共享同一个 `id`，`role` 最多出现一次且只在最早的 chunk 上。

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 发言角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流式输出的最小单元
///
/// 解码成功时创建，创建后不可变，转发给输出端后即丢弃。
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// 响应关联 ID（同一响应内不变）
    pub id: String,
    /// 发言角色，仅出现在响应的第一个 chunk 上
    pub role: Option<ChatRole>,
    /// 本次增量文本
    pub content_delta: Option<String>,
    /// 生成时间
    pub created_at: DateTime<FixedOffset>,
}

impl ChunkRecord {
    /// 创建新的 chunk，时间戳取当前本地时间
    pub fn new(id: impl Into<String>, role: Option<ChatRole>, content_delta: Option<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content_delta,
            created_at: Local::now().fixed_offset(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<FixedOffset>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 非空的增量文本
    pub fn content(&self) -> Option<&str> {
        self.content_delta.as_deref().filter(|s| !s.is_empty())
    }

    /// 转换为线上格式
    pub fn to_payload(&self) -> ChunkPayload {
        ChunkPayload {
            id: Some(self.id.clone()),
            role: self.role,
            content: self.content_delta.clone(),
            created_date_time: Some(self.created_at),
        }
    }
}

/// SSE 线上格式
///
/// ```text
/// data: {"id":"…","role":"assistant","content":"こん","createdDateTime":"2024-05-01T10:00:00.123+09:00"}
/// ```
///
/// 解码时所有字段都可缺省，缺失的 `id` / `createdDateTime` 由接收方补齐。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        rename = "createdDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_date_time: Option<DateTime<FixedOffset>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_role_serde() {
        assert_eq!(serde_json::to_string(&ChatRole::Assistant).unwrap(), "\"assistant\"");
        let role: ChatRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, ChatRole::System);
        assert!(serde_json::from_str::<ChatRole>("\"narrator\"").is_err());
    }

    #[test]
    fn test_payload_wire_field_names() {
        let created = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123+09:00").unwrap();
        let record = ChunkRecord::new("r-1", Some(ChatRole::Assistant), Some("こん".to_string()))
            .with_created_at(created);

        let json = serde_json::to_value(record.to_payload()).unwrap();
        assert_eq!(json["id"], "r-1");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "こん");
        assert_eq!(json["createdDateTime"], "2024-05-01T10:00:00.123+09:00");
    }

    #[test]
    fn test_payload_omits_absent_fields() {
        let record = ChunkRecord::new("r-1", None, Some("x".to_string()));
        let json = serde_json::to_string(&record.to_payload()).unwrap();
        assert!(!json.contains("role"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_payload_decode_role_only() {
        let payload: ChunkPayload = serde_json::from_str(r#"{"role":"assistant"}"#).unwrap();
        assert_eq!(payload.role, Some(ChatRole::Assistant));
        assert!(payload.content.is_none());
        assert!(payload.id.is_none());
    }

    #[test]
    fn test_payload_decode_seven_digit_fraction() {
        // 七位小数秒的时间戳同样可以解析
        let payload: ChunkPayload = serde_json::from_str(
            r#"{"id":"a","content":"x","createdDateTime":"2024-05-01T10:00:00.1234567+09:00"}"#,
        )
        .unwrap();
        assert!(payload.created_date_time.is_some());
    }

    #[test]
    fn test_content_filters_empty() {
        let record = ChunkRecord::new("r", None, Some(String::new()));
        assert_eq!(record.content(), None);
        let record = ChunkRecord::new("r", None, Some("a".to_string()));
        assert_eq!(record.content(), Some("a"));
    }
}
