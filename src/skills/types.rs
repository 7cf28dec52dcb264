//! 技能数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ErrorRecord;

/// 技能状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    Unverified,
    Verifying,
    Verified,
    Failed,
    Disabled,
}

/// 前置能力；有 verification_url 的需要远程确认
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub status: SkillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub retry_count: u32,
}

impl Skill {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        display_name: impl Into<String>,
        verification_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: display_name.into(),
            status: SkillStatus::Unverified,
            verification_url,
            last_verified: None,
            error: None,
            retry_count: 0,
        }
    }

    /// 已到达终态（verified / failed）
    pub fn is_settled(&self) -> bool {
        matches!(self.status, SkillStatus::Verified | SkillStatus::Failed)
    }
}

/// 清单里的技能定义（skill 种类，键集合严格）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SkillDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub verification_url: Option<String>,
}

impl SkillDefinition {
    pub fn into_skill(self) -> Skill {
        let display_name = self.display_name.unwrap_or_else(|| self.name.clone());
        Skill::new(self.id, self.name, display_name, self.verification_url)
    }
}
