//! 错误分类与重试退避
//!
//! 纯函数：判断网络错误 / 可恢复错误，计算指数退避延迟。验证器据此决定重试还是落定失败。

use std::time::Duration;

use crate::network::NetworkError;

/// 连接层故障标记（小写，子串匹配）
const NETWORK_MARKERS: &[&str] = &[
    "enotfound",
    "eai_again",
    "econnrefused",
    "connection refused",
    "fetch failed",
    "dns error",
    "failed to lookup address",
];

/// 限流标记
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "ratelimit", "too many requests"];

fn contains_marker(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// 是否为连接层错误（DNS 解析失败、拒绝连接、通用 fetch 失败）
pub fn is_network_error(err: &NetworkError) -> bool {
    match err {
        NetworkError::Cancelled => false,
        _ => contains_marker(&err.to_string(), NETWORK_MARKERS),
    }
}

/// 是否可恢复：网络错误、5xx、限流；自身超时同样可重试，外部取消永不重试。4xx 不可恢复。
pub fn is_recoverable_error(err: &NetworkError) -> bool {
    match err {
        NetworkError::Cancelled => false,
        NetworkError::Timeout(_) => true,
        _ => {
            if is_network_error(err) {
                return true;
            }
            if matches!(err.status(), Some(status) if (500..600).contains(&status)) {
                return true;
            }
            contains_marker(&err.to_string(), RATE_LIMIT_MARKERS)
        }
    }
}

/// 重试策略：最大重试次数 + 指数退避的基数与上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// base * 2^attempt，封顶 max_delay
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}
