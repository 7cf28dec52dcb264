//! 错误分类码与错误记录
//!
//! ErrorCode 是会话与技能共用的错误码（内置码 + 调用方自定义码）；ErrorRecord 是挂在
//! Session / Skill 上并随会话一起持久化的错误形态。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::Diagnostics;

/// 错误码：内置五种 + 调用方提供的会话错误码
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    SkillNotFound,
    VerificationCancelled,
    NetworkError,
    VerificationError,
    VerificationTimeout,
    /// 调用方自定义（如上游后端返回的会话错误）
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SkillNotFound => "SKILL_NOT_FOUND",
            Self::VerificationCancelled => "VERIFICATION_CANCELLED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::VerificationError => "VERIFICATION_ERROR",
            Self::VerificationTimeout => "VERIFICATION_TIMEOUT",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "SKILL_NOT_FOUND" => Self::SkillNotFound,
            "VERIFICATION_CANCELLED" => Self::VerificationCancelled,
            "NETWORK_ERROR" => Self::NetworkError,
            "VERIFICATION_ERROR" => Self::VerificationError,
            "VERIFICATION_TIMEOUT" => Self::VerificationTimeout,
            _ => Self::Other(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 附着在会话或技能上的错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
        }
    }
}

/// 会话管理器的错误（创建 / 校验阶段）
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid session config: {0}")]
    InvalidConfig(Diagnostics),
}

/// 单个技能验证的终态失败；所有合流调用方拿到的是同一个值，因此需要 Clone
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Skill is disabled: {0}")]
    Disabled(String),

    #[error("Verification cancelled")]
    Cancelled,

    #[error("Verification timed out: {0}")]
    Timeout(String),

    #[error("Network error: {message}")]
    Network { message: String, recoverable: bool },

    #[error("Verification failed: {message}")]
    Failed { message: String, recoverable: bool },
}

impl VerificationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SkillNotFound(_) => ErrorCode::SkillNotFound,
            Self::Cancelled => ErrorCode::VerificationCancelled,
            Self::Timeout(_) => ErrorCode::VerificationTimeout,
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::Disabled(_) | Self::Failed { .. } => ErrorCode::VerificationError,
        }
    }

    pub fn recoverable(&self) -> bool {
        match self {
            Self::Network { recoverable, .. } | Self::Failed { recoverable, .. } => *recoverable,
            Self::Timeout(_) => true,
            Self::SkillNotFound(_) | Self::Disabled(_) | Self::Cancelled => false,
        }
    }

    /// 转换为可持久化的错误记录（时间戳取当前）
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.code(), self.to_string(), self.recoverable())
    }
}
