//! HTTP 中继服务
//!
//! 路由：
//!
//! | 方法 | 路径             | 说明                         |
//! |------|------------------|------------------------------|
//! | POST | `/ChatStreaming` | 用户消息 -> SSE 流式对话响应 |

pub mod handlers;


use crate::config::{RelayConfig, ServerConfig};
use crate::error::RelayError;
use crate::providers::UpstreamTarget;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use reqwest::Client;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// 服务共享状态
#[derive(Debug)]
pub struct AppState {
    /// 上游配置缺失时，每个请求都返回 `ConfigurationMissing`
    pub upstream: Result<UpstreamTarget, RelayError>,
    pub system_prompt: String,
    pub emit_error_events: bool,
}

impl AppState {
    pub fn new(upstream: Result<UpstreamTarget, RelayError>, system_prompt: impl Into<String>) -> Self {
        Self {
            upstream,
            system_prompt: system_prompt.into(),
            emit_error_events: false,
        }
    }

    pub fn from_config(config: &RelayConfig, http: Client) -> Self {
        let upstream = UpstreamTarget::from_config(config, http);
        if let Err(e) = &upstream {
            tracing::warn!("[SERVER] 上游未就绪，请求将返回错误: {}", e);
        }
        Self::new(upstream, config.prompts.system.clone())
            .with_error_events(config.server.emit_error_events)
    }

    pub fn with_error_events(mut self, enabled: bool) -> Self {
        self.emit_error_events = enabled;
        self
    }
}

/// 构建路由
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/ChatStreaming", post(handlers::chat_streaming))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(Arc::new(state))
}

/// 启动服务，收到 Ctrl+C 后优雅退出
pub async fn serve(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state, config.body_limit_bytes);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[SERVER] 监听 {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("[SERVER] 收到中断信号，正在关闭");
        })
        .await?;

    Ok(())
}
