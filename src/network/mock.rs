//! Mock 网络客户端（用于测试，无需真实网络）
//!
//! 按 URL 排队预设回复；队列只剩最后一条时反复返回它。记录调用次数，便于断言合流只发一次请求。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{NetworkClient, NetworkError, NetworkRequest, NetworkResponse};

/// 预设回复
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 + body
    Ok(String),
    Fail(NetworkError),
    /// 永不返回，且不理会取消令牌
    Hang,
    /// 延迟后再给出内层回复（延迟期间不理会取消令牌）
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn ok() -> Self {
        Self::Ok("ok".to_string())
    }

    pub fn http(status: u16, message: &str) -> Self {
        Self::Fail(NetworkError::Http {
            status,
            message: message.to_string(),
        })
    }

    pub fn transport(message: &str) -> Self {
        Self::Fail(NetworkError::Transport(message.to_string()))
    }

    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        Self::Delayed(delay, Box::new(reply))
    }
}

/// Mock 客户端：未配置的 URL 默认返回 200
#[derive(Debug, Default)]
pub struct MockNetworkClient {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: AtomicUsize,
    calls_by_url: Mutex<HashMap<String, usize>>,
}

impl MockNetworkClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某 URL 追加一条回复
    pub fn push_reply(&self, url: &str, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(url.to_string()).or_default().push_back(reply);
        }
    }

    pub fn with_reply(self, url: &str, reply: MockReply) -> Self {
        self.push_reply(url, reply);
        self
    }

    /// 总调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls_by_url
            .lock()
            .map(|m| m.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn next_reply(&self, url: &str) -> MockReply {
        let Ok(mut replies) = self.replies.lock() else {
            return MockReply::ok();
        };
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(MockReply::ok),
            Some(queue) => queue.front().cloned().unwrap_or_else(MockReply::ok),
            None => MockReply::ok(),
        }
    }
}

async fn resolve(reply: MockReply) -> Result<NetworkResponse, NetworkError> {
    let mut reply = reply;
    loop {
        match reply {
            MockReply::Ok(body) => return Ok(NetworkResponse { status: 200, body }),
            MockReply::Fail(err) => return Err(err),
            MockReply::Hang => std::future::pending::<()>().await,
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl NetworkClient for MockNetworkClient {
    async fn call(
        &self,
        request: NetworkRequest,
        _cancel: CancellationToken,
        _timeout: Duration,
    ) -> Result<NetworkResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut by_url) = self.calls_by_url.lock() {
            *by_url.entry(request.url.clone()).or_insert(0) += 1;
        }
        let reply = self.next_reply(&request.url);
        resolve(reply).await
    }
}
