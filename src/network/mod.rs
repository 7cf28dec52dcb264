//! 网络协作者：出站调用抽象
//!
//! 所有实现（reqwest / Mock）实现 NetworkClient::call；错误面必须区分「内部超时」与「外部取消」，
//! 验证器据此决定重试还是立即放弃。

pub mod http;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::HttpClient;
pub use mock::{MockNetworkClient, MockReply};

/// HTTP 方法（验证只用到这几种）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

/// 一次出站请求
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl NetworkRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// 成功响应（2xx）
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    pub status: u16,
    pub body: String,
}

/// 出站调用失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// 自身超时（预算内可重试）
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// 外部取消（从不重试）
    #[error("request cancelled")]
    Cancelled,

    /// 服务端返回非 2xx
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// 连接层失败（DNS、拒绝连接等）
    #[error("{0}")]
    Transport(String),
}

impl NetworkError {
    /// 附带的 HTTP 状态码（仅 Http 变体有）
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 网络客户端：一次调用同时受 cancel 与 timeout 约束
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn call(
        &self,
        request: NetworkRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<NetworkResponse, NetworkError>;
}
