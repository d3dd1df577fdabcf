//! Chat Relay
//!
//! LLM 流式对话中继：
//!
//! - `relay-console`: 交互式控制台，直接调用 Provider 或经由中继 API
//! - `relay-server`: HTTP 服务，`POST /ChatStreaming` 以 SSE 转发 Provider 的流式输出

pub mod config;
pub mod console;
pub mod error;
pub mod logger;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod stream;

pub use config::RelayConfig;
pub use error::RelayError;
