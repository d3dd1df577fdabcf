//! 中继错误类型
//!
//! 定义流式中继过程中可能发生的错误

use thiserror::Error;

/// 中继错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// 缺少必需的配置项（endpoint / key / 模型名等）
    #[error("缺少配置项: {0}")]
    ConfigurationMissing(String),

    /// 配置文件无法读取或解析
    #[error("配置错误: {0}")]
    Config(String),

    /// 网络层失败（建立连接或读取流）
    #[error("传输失败: {0}")]
    Transport(String),

    /// 上游返回非成功状态码
    #[error("上游返回错误状态 {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// `data: ` 行无法解码为预期的结构
    #[error("无法解析的数据块: {reason} - line: {line}")]
    MalformedChunk { line: String, reason: String },

    /// 请求参数无效
    #[error("无效请求: {0}")]
    InvalidRequest(String),

    /// 本地写入失败
    #[error("IO 错误: {0}")]
    Io(String),

    /// 下游客户端已断开
    #[error("客户端已断开")]
    ClientDisconnected,

    /// 请求被取消
    #[error("请求已取消")]
    Cancelled,
}

impl RelayError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::ConfigurationMissing(_) => 500,
            RelayError::Config(_) => 500,
            RelayError::Transport(_) => 502,
            RelayError::UpstreamStatus { .. } => 502,
            RelayError::MalformedChunk { .. } => 502,
            RelayError::InvalidRequest(_) => 400,
            RelayError::Io(_) => 500,
            RelayError::ClientDisconnected => 499,
            RelayError::Cancelled => 499,
        }
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::ConfigurationMissing(_) => "configuration_missing",
            RelayError::Config(_) => "config_error",
            RelayError::Transport(_) => "transport_failure",
            RelayError::UpstreamStatus { .. } => "upstream_error",
            RelayError::MalformedChunk { .. } => "malformed_chunk",
            RelayError::InvalidRequest(_) => "invalid_request_error",
            RelayError::Io(_) => "io_error",
            RelayError::ClientDisconnected => "client_disconnected",
            RelayError::Cancelled => "cancelled",
        }
    }

    /// 是否属于调用方主动结束（取消或下游断开）
    ///
    /// 这两类不算失败，管道会以 `Cancelled` 结局收尾。
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::ClientDisconnected | RelayError::Cancelled)
    }

    /// 转换为 JSON 错误响应
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code()
            }
        })
    }

    /// 转换为 SSE 错误事件
    ///
    /// 响应头已经发出后无法再修改状态码，只能通过专用的 `error` 事件告知客户端。
    pub fn to_sse_error(&self) -> String {
        format!("event: error\ndata: {}\n\n", self.to_json())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => RelayError::ClientDisconnected,
            _ => RelayError::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_status_codes() {
        assert_eq!(
            RelayError::ConfigurationMissing("upstream.endpoint".to_string()).status_code(),
            500
        );
        assert_eq!(RelayError::Transport("reset".to_string()).status_code(), 502);
        assert_eq!(
            RelayError::UpstreamStatus {
                status: 401,
                body: "denied".to_string()
            }
            .status_code(),
            502
        );
        assert_eq!(RelayError::InvalidRequest("empty".to_string()).status_code(), 400);
        assert_eq!(RelayError::Cancelled.status_code(), 499);
    }

    #[test]
    fn test_relay_error_is_disconnect() {
        assert!(RelayError::Cancelled.is_disconnect());
        assert!(RelayError::ClientDisconnected.is_disconnect());
        assert!(!RelayError::Transport("x".to_string()).is_disconnect());
        assert!(!RelayError::MalformedChunk {
            line: "data: {".to_string(),
            reason: "eof".to_string()
        }
        .is_disconnect());
    }

    #[test]
    fn test_relay_error_to_json() {
        let error = RelayError::ConfigurationMissing("upstream.api_key".to_string());
        let json = error.to_json();

        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("upstream.api_key"));
        assert_eq!(json["error"]["type"], "configuration_missing");
        assert_eq!(json["error"]["code"], 500);
    }

    #[test]
    fn test_relay_error_to_sse_error() {
        let sse = RelayError::Transport("connection reset".to_string()).to_sse_error();
        assert!(sse.starts_with("event: error\ndata: {"));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains("transport_failure"));
    }

    #[test]
    fn test_io_error_mapping() {
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(RelayError::from(broken), RelayError::ClientDisconnected);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(matches!(RelayError::from(other), RelayError::Io(_)));
    }
}
