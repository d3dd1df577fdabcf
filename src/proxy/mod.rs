//! HTTP 传输模块
//!
//! 进程内共享的 `reqwest::Client` 在这里创建：一次创建，所有请求复用连接池。

mod client_factory;

pub use client_factory::{HttpClientFactory, ProxyError, ProxyProtocol};
