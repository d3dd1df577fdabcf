//! HTTP 客户端工厂
//!
//! 创建共享的 HTTP 客户端，支持连接超时、可选的整体请求超时和代理
//! （socks5、http、https）

use crate::config::HttpConfig;
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;

/// 代理协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    /// SOCKS5 代理
    Socks5,
    /// HTTP 代理
    Http,
    /// HTTPS 代理
    Https,
}

impl ProxyProtocol {
    /// 从 URL 字符串解析代理协议
    pub fn from_url(url: &str) -> Option<Self> {
        let url_lower = url.to_lowercase();
        if url_lower.starts_with("socks5://") {
            Some(ProxyProtocol::Socks5)
        } else if url_lower.starts_with("http://") {
            Some(ProxyProtocol::Http)
        } else if url_lower.starts_with("https://") {
            Some(ProxyProtocol::Https)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
        }
    }
}

/// 客户端构建错误
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 无效的代理 URL
    #[error("无效的代理 URL: {0}")]
    InvalidUrl(String),

    /// 不支持的代理协议
    #[error("不支持的代理协议: {0}")]
    UnsupportedProtocol(String),

    /// 代理配置错误
    #[error("代理配置错误: {0}")]
    ConfigError(String),

    /// 客户端构建错误
    #[error("客户端构建错误: {0}")]
    ClientBuildError(String),
}

/// HTTP 客户端工厂
///
/// 流式响应可能持续很久，因此整体请求超时默认关闭，只限制连接建立时间。
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    proxy: Option<String>,
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
        }
    }
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据配置创建工厂
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            proxy: config.proxy.clone().filter(|p| !p.trim().is_empty()),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: config.request_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.proxy = proxy_url;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// 解析代理 URL 并返回协议类型
    pub fn parse_proxy_url(url: &str) -> Result<ProxyProtocol, ProxyError> {
        if url.trim().is_empty() {
            return Err(ProxyError::InvalidUrl("代理 URL 不能为空".to_string()));
        }

        ProxyProtocol::from_url(url).ok_or_else(|| ProxyError::UnsupportedProtocol(url.to_string()))
    }

    /// 创建 HTTP 客户端
    pub fn create_client(&self) -> Result<Client, ProxyError> {
        let mut builder = Client::builder().connect_timeout(self.connect_timeout);

        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(url) = self.proxy.as_deref() {
            let protocol = Self::parse_proxy_url(url)?;
            tracing::info!("[HTTP_CLIENT] 使用 {} 代理", protocol.as_str());
            let proxy = Proxy::all(url).map_err(|e| ProxyError::ConfigError(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| ProxyError::ClientBuildError(e.to_string()))
    }
}
