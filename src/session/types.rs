//! 会话数据模型
//!
//! Session 只能整条替换，不对外暴露逐字段修改；SessionUpdate 是 update_session 的部分更新描述。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ErrorRecord;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Initializing,
    Running,
    /// 可恢复，外部可重新 start
    Error,
    /// 对该 id 终结，直到记录被删除
    Terminated,
}

/// 会话配置：键集合固定为 model / system / tools / timeout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// 僵尸判定窗口（毫秒）
    pub timeout: u64,
}

/// 创建会话时的原始配置（timeout 可缺省）
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SessionConfigInput {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl SessionConfigInput {
    pub(crate) fn into_config(self, default_timeout_ms: u64) -> SessionConfig {
        SessionConfig {
            model: self.model,
            system: self.system,
            tools: self.tools,
            timeout: self.timeout.unwrap_or(default_timeout_ms),
        }
    }
}

/// 会话统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionStats {
    pub total_tokens: u64,
    pub turn_count: u32,
    /// 首次 start 的时间
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    pub last_activity_time: DateTime<Utc>,
}

impl SessionStats {
    pub fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            total_tokens: 0,
            turn_count: 0,
            start_time: None,
            last_activity_time: now,
        }
    }
}

/// 单个会话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    /// 交接完成标志；只能由 mark_system_sent 置 true
    pub system_sent: bool,
    pub interrupted: bool,
    pub config: SessionConfig,
    pub stats: SessionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: String, name: String, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            status: SessionStatus::Idle,
            system_sent: false,
            interrupted: false,
            config,
            stats: SessionStats::zeroed(now),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }
}

/// 统计的部分更新（与当前统计合并）
#[derive(Debug, Clone, Default)]
pub struct StatsUpdate {
    pub total_tokens: Option<u64>,
    pub turn_count: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
}

/// update_session 的部分更新；未给出的字段保持原值。system_sent 不在其中。
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub status: Option<SessionStatus>,
    pub interrupted: Option<bool>,
    pub config: Option<SessionConfig>,
    pub stats: Option<StatsUpdate>,
    /// Some(None) 清除错误
    pub error: Option<Option<ErrorRecord>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: Option<ErrorRecord>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_stats(mut self, stats: StatsUpdate) -> Self {
        self.stats = Some(stats);
        self
    }

    /// 合并到快照上，返回新记录（不修改原记录）
    pub(crate) fn apply(self, current: &Session) -> Session {
        let mut next = current.clone();
        if let Some(name) = self.name {
            next.name = name;
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(interrupted) = self.interrupted {
            next.interrupted = interrupted;
        }
        // 终止总是视为被打断
        if next.status == SessionStatus::Terminated {
            next.interrupted = true;
        }
        if let Some(config) = self.config {
            next.config = config;
        }
        if let Some(stats) = self.stats {
            if let Some(total_tokens) = stats.total_tokens {
                next.stats.total_tokens = total_tokens;
            }
            if let Some(turn_count) = stats.turn_count {
                next.stats.turn_count = turn_count;
            }
            if let Some(start_time) = stats.start_time {
                next.stats.start_time = Some(start_time);
            }
        }
        if let Some(error) = self.error {
            next.error = error;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            model: "m".into(),
            system: None,
            tools: None,
            timeout: 1000,
        }
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session::new("s1".into(), "demo".into(), config());
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["systemSent"], false);
        assert_eq!(value["status"], "idle");
        assert!(value["stats"]["lastActivityTime"].is_string());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_update_merges_stats_without_touching_others() {
        let mut session = Session::new("s1".into(), "demo".into(), config());
        session.stats.turn_count = 4;
        let next = SessionUpdate::default()
            .with_stats(StatsUpdate {
                total_tokens: Some(120),
                ..Default::default()
            })
            .apply(&session);
        assert_eq!(next.stats.total_tokens, 120);
        assert_eq!(next.stats.turn_count, 4);
        assert_eq!(next.name, "demo");
    }

    #[test]
    fn test_terminated_update_always_interrupts() {
        let session = Session::new("s1".into(), "demo".into(), config());
        let mut update = SessionUpdate::status(SessionStatus::Terminated);
        update.interrupted = Some(false);
        assert!(update.apply(&session).interrupted);
    }
}
