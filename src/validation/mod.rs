//! 配置校验：按配置种类严格校验原始 JSON
//!
//! 每种配置（session / skill / agent-defaults）有固定的允许键集合。出现集合外的键时整体拒绝，
//! 并区分两类缺陷：
//! - UnexpectedKey：任何种类都不认识的键
//! - SchemaDrift：属于更宽的种类（如 agent-defaults）、却出现在更窄种类里的键

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// 配置种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Session,
    Skill,
    AgentDefaults,
}

impl ConfigKind {
    pub fn allowed_keys(self) -> &'static [&'static str] {
        match self {
            Self::Session => &["model", "system", "tools", "timeout"],
            Self::Skill => &["id", "name", "displayName", "verificationUrl"],
            Self::AgentDefaults => &[
                "model",
                "system",
                "tools",
                "timeout",
                "maxRetries",
                "verificationTimeout",
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Skill => "skill",
            Self::AgentDefaults => "agent-defaults",
        }
    }

    const ALL: [ConfigKind; 3] = [Self::Session, Self::Skill, Self::AgentDefaults];
}

/// 单条缺陷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    NotAnObject,
    UnexpectedKey(String),
    /// 该键属于 `belongs_to` 种类
    SchemaDrift { key: String, belongs_to: ConfigKind },
    /// 类型错误、缺少必填字段等
    Invalid(String),
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "expected an object"),
            Self::UnexpectedKey(key) => write!(f, "unexpected key `{key}`"),
            Self::SchemaDrift { key, belongs_to } => {
                write!(f, "schema drift: `{key}` belongs to {}", belongs_to.name())
            }
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

/// 校验失败时的诊断集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub kind: ConfigKind,
    pub defects: Vec<Defect>,
}

impl Diagnostics {
    /// 是否含有「多出来的键」类缺陷
    pub fn has_unexpected_keys(&self) -> bool {
        self.defects
            .iter()
            .any(|d| matches!(d, Defect::UnexpectedKey(_) | Defect::SchemaDrift { .. }))
    }

    pub fn is_schema_drift(&self) -> bool {
        self.defects
            .iter()
            .any(|d| matches!(d, Defect::SchemaDrift { .. }))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.defects.iter().map(|d| d.to_string()).collect();
        write!(f, "{} config rejected: {}", self.kind.name(), parts.join("; "))
    }
}

impl std::error::Error for Diagnostics {}

/// 对一个键分类：属于哪个更宽的种类则是 drift，否则是未知键
fn classify_key(kind: ConfigKind, key: &str) -> Defect {
    ConfigKind::ALL
        .into_iter()
        .filter(|other| *other != kind)
        .find(|other| other.allowed_keys().contains(&key))
        .map(|belongs_to| Defect::SchemaDrift {
            key: key.to_string(),
            belongs_to,
        })
        .unwrap_or_else(|| Defect::UnexpectedKey(key.to_string()))
}

/// 仅检查键集合，返回全部越界键（serde 只会报第一个）
pub fn check_keys(kind: ConfigKind, raw: &Value) -> Result<(), Diagnostics> {
    let Some(object) = raw.as_object() else {
        return Err(Diagnostics {
            kind,
            defects: vec![Defect::NotAnObject],
        });
    };
    let allowed = kind.allowed_keys();
    let defects: Vec<Defect> = object
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .map(|key| classify_key(kind, key))
        .collect();
    if defects.is_empty() {
        Ok(())
    } else {
        Err(Diagnostics { kind, defects })
    }
}

/// 严格校验并反序列化为目标类型
pub fn validate<T: DeserializeOwned>(kind: ConfigKind, raw: &Value) -> Result<T, Diagnostics> {
    check_keys(kind, raw)?;
    serde_json::from_value(raw.clone()).map_err(|e| Diagnostics {
        kind,
        defects: vec![Defect::Invalid(e.to_string())],
    })
}
