//! 数据块构建
//!
//! 两种上游的增量统一转换为 [`ChunkRecord`]：
//!
//! - [`ChatUpdateParser`]：Provider SDK 风格的 `StreamingChatUpdate`
//! - [`RelayPayloadParser`]：中继 API 的 `ChunkPayload`
//!
//! 两者都保证同一响应内 `id` 不变、`role` 至多出现一次。

use crate::providers::StreamingChatUpdate;
use crate::stream::chunk::{ChunkPayload, ChunkRecord};
use chrono::Local;
use uuid::Uuid;

/// Provider 增量解析器
///
/// 每个更新都产出一个 chunk（即使没有内容），以保持上游顺序与数量。
#[derive(Debug)]
pub struct ChatUpdateParser {
    response_id: String,
    role_emitted: bool,
}

impl Default for ChatUpdateParser {
    fn default() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }
}

impl ChatUpdateParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            role_emitted: false,
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn parse(&mut self, update: &StreamingChatUpdate) -> ChunkRecord {
        let role = match update.role {
            Some(role) if !self.role_emitted => {
                self.role_emitted = true;
                Some(role)
            }
            _ => None,
        };
        let content = update
            .content_update
            .as_ref()
            .filter(|c| !c.is_empty())
            .cloned();

        ChunkRecord::new(self.response_id.clone(), role, content)
    }
}

/// 中继负载解析器
///
/// 缺失的 `id` 使用本次请求生成的 ID，缺失的时间戳取当前时间。
#[derive(Debug)]
pub struct RelayPayloadParser {
    fallback_id: String,
    role_emitted: bool,
}

impl Default for RelayPayloadParser {
    fn default() -> Self {
        Self::with_fallback_id(Uuid::new_v4().to_string())
    }
}

impl RelayPayloadParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_id(fallback_id: impl Into<String>) -> Self {
        Self {
            fallback_id: fallback_id.into(),
            role_emitted: false,
        }
    }

    pub fn parse(&mut self, payload: ChunkPayload) -> ChunkRecord {
        let role = match payload.role {
            Some(role) if !self.role_emitted => {
                self.role_emitted = true;
                Some(role)
            }
            _ => None,
        };

        ChunkRecord {
            id: payload.id.unwrap_or_else(|| self.fallback_id.clone()),
            role,
            content_delta: payload.content,
            created_at: payload
                .created_date_time
                .unwrap_or_else(|| Local::now().fixed_offset()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::chunk::ChatRole;

    fn update(role: Option<ChatRole>, content: Option<&str>) -> StreamingChatUpdate {
        StreamingChatUpdate {
            role,
            content_update: content.map(str::to_string),
            finish_reason: None,
        }
    }

    #[test]
    fn test_chat_update_role_only_once() {
        let mut parser = ChatUpdateParser::with_id("resp-1");
        let first = parser.parse(&update(Some(ChatRole::Assistant), None));
        let second = parser.parse(&update(Some(ChatRole::Assistant), Some("こん")));

        assert_eq!(first.role, Some(ChatRole::Assistant));
        assert_eq!(first.content_delta, None);
        assert_eq!(second.role, None);
        assert_eq!(second.content_delta.as_deref(), Some("こん"));
        assert_eq!(first.id, "resp-1");
        assert_eq!(second.id, "resp-1");
    }

    #[test]
    fn test_chat_update_empty_update_still_yields_chunk() {
        let mut parser = ChatUpdateParser::new();
        let record = parser.parse(&update(None, Some("")));
        assert!(record.role.is_none());
        assert!(record.content_delta.is_none());
        assert_eq!(record.id, parser.response_id());
    }

    #[test]
    fn test_relay_payload_fallbacks() {
        let mut parser = RelayPayloadParser::with_fallback_id("local-id");
        let record = parser.parse(ChunkPayload {
            content: Some("x".to_string()),
            ..Default::default()
        });
        assert_eq!(record.id, "local-id");
        assert_eq!(record.content_delta.as_deref(), Some("x"));
    }

    #[test]
    fn test_relay_payload_keeps_upstream_id_and_time() {
        let created = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00+09:00").unwrap();
        let mut parser = RelayPayloadParser::new();
        let record = parser.parse(ChunkPayload {
            id: Some("upstream".to_string()),
            role: Some(ChatRole::Assistant),
            content: None,
            created_date_time: Some(created),
        });
        assert_eq!(record.id, "upstream");
        assert_eq!(record.created_at, created);

        let again = parser.parse(ChunkPayload {
            role: Some(ChatRole::Assistant),
            ..Default::default()
        });
        assert_eq!(again.role, None);
    }
}
