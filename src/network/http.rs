//! reqwest 实现的网络客户端
//!
//! 每次调用都在 select! 中同时等待：外部取消、自身超时、请求完成；非 2xx 映射为 NetworkError::Http。

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::{Method, NetworkClient, NetworkError, NetworkRequest, NetworkResponse};

const USER_AGENT: &str = concat!("handoff/", env!("CARGO_PKG_VERSION"));

/// 基于 reqwest 的客户端；超时由调用方逐次传入，不在 Client 上设置全局值
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(NetworkError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(NetworkResponse {
            status: status.as_u16(),
            body,
        })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 把 reqwest 错误连同 source 链展开成一行，便于分类器做子串匹配
fn map_reqwest_error(err: reqwest::Error) -> NetworkError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    if err.is_connect() && !message.to_lowercase().contains("connect") {
        message = format!("connection failed: {message}");
    }
    NetworkError::Transport(message)
}

#[async_trait]
impl NetworkClient for HttpClient {
    async fn call(
        &self,
        request: NetworkRequest,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<NetworkResponse, NetworkError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(NetworkError::Timeout(timeout)),
            result = self.send(request) => result,
        }
    }
}
