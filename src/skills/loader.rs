//! 技能清单加载器
//!
//! 清单是一个 TOML 文件：
//! ```toml
//! [defaults]            # agent-defaults 种类
//! model = "claude-sonnet"
//! verificationTimeout = 10000
//!
//! [[skills]]            # skill 种类，可多条
//! id = "search"
//! name = "search"
//! displayName = "Web Search"
//! verificationUrl = "https://example.com/health"
//! ```
//! 每个表先转成 JSON 再按各自种类校验；无效的技能条目跳过并告警。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use super::types::{Skill, SkillDefinition};
use super::verifier::{SkillVerifier, VerifierSettings};
use crate::validation::{validate, ConfigKind};

/// 清单里的 [defaults]（agent-defaults 种类）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentDefaults {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// 会话超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// 单技能验证超时（毫秒）
    #[serde(default)]
    pub verification_timeout: Option<u64>,
}

impl AgentDefaults {
    /// 生成会话配置 JSON；未给出的字段由 SessionManager 的默认值补齐
    pub fn session_config(&self, fallback_model: &str) -> Value {
        let mut config = serde_json::Map::new();
        let model = self.model.as_deref().unwrap_or(fallback_model);
        config.insert("model".into(), Value::String(model.to_string()));
        if let Some(system) = &self.system {
            config.insert("system".into(), Value::String(system.clone()));
        }
        if let Some(tools) = &self.tools {
            config.insert("tools".into(), Value::from(tools.clone()));
        }
        if let Some(timeout) = self.timeout {
            config.insert("timeout".into(), Value::from(timeout));
        }
        Value::Object(config)
    }

    /// 清单里的 maxRetries 覆盖配置文件中的重试次数
    pub fn apply_to(&self, settings: &mut VerifierSettings) {
        if let Some(max_retries) = self.max_retries {
            settings.retry.max_retries = max_retries;
        }
    }
}

/// 加载结果
#[derive(Debug, Clone, Default)]
pub struct SkillManifest {
    pub defaults: AgentDefaults,
    pub skills: Vec<SkillDefinition>,
    /// 被跳过的条目数
    pub rejected: usize,
}

impl SkillManifest {
    /// 把全部技能注册进验证器
    pub async fn register_all(&self, verifier: &SkillVerifier) -> Vec<Skill> {
        let mut registered = Vec::with_capacity(self.skills.len());
        for def in &self.skills {
            let skill = def.clone().into_skill();
            registered.push(
                verifier
                    .register_skill(&skill.id, &skill.name, &skill.display_name, skill.verification_url)
                    .await,
            );
        }
        registered
    }
}

/// 技能清单加载器
pub struct SkillLoader {
    path: PathBuf,
}

impl SkillLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取并解析清单；文件不存在时返回空清单
    pub fn load(&self) -> anyhow::Result<SkillManifest> {
        if !self.path.exists() {
            tracing::info!("No skill manifest at {}", self.path.display());
            return Ok(SkillManifest::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading skill manifest {}", self.path.display()))?;
        let manifest = parse_manifest(&content)
            .with_context(|| format!("parsing skill manifest {}", self.path.display()))?;
        tracing::info!(
            "Loaded {} skills from {} ({} rejected)",
            manifest.skills.len(),
            self.path.display(),
            manifest.rejected
        );
        Ok(manifest)
    }
}

/// 解析清单文本。[defaults] 无效时整体报错；单条技能无效时跳过。
pub fn parse_manifest(content: &str) -> anyhow::Result<SkillManifest> {
    let document: toml::Table = toml::from_str(content).context("invalid TOML")?;

    let defaults = match document.get("defaults") {
        Some(raw) => {
            let raw = serde_json::to_value(raw)?;
            validate::<AgentDefaults>(ConfigKind::AgentDefaults, &raw)?
        }
        None => AgentDefaults::default(),
    };

    let mut skills = Vec::new();
    let mut rejected = 0;
    let entries = match document.get("skills") {
        Some(toml::Value::Array(entries)) => entries.as_slice(),
        Some(_) => anyhow::bail!("`skills` must be an array of tables"),
        None => &[],
    };
    for (index, entry) in entries.iter().enumerate() {
        let raw = serde_json::to_value(entry)?;
        match validate::<SkillDefinition>(ConfigKind::Skill, &raw) {
            Ok(def) if skills.iter().any(|s: &SkillDefinition| s.id == def.id) => {
                tracing::warn!("Skipping duplicate skill '{}' in manifest", def.id);
                rejected += 1;
            }
            Ok(def) => skills.push(def),
            Err(diagnostics) => {
                tracing::warn!("Skipping skill entry #{}: {}", index, diagnostics);
                rejected += 1;
            }
        }
    }

    Ok(SkillManifest {
        defaults,
        skills,
        rejected,
    })
}
