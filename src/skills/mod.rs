//! 技能系统
//!
//! 技能（Skill）是会话开工前需要确认的前置能力。带 verificationUrl 的技能
//! 通过一次远程调用确认；不带的视为本地能力，直接通过。
//!
//! - **types**: Skill 记录与清单定义
//! - **verifier**: 合流、重试、取消与总期限
//! - **loader**: TOML 技能清单

mod loader;
mod types;
mod verifier;

pub use loader::{parse_manifest, AgentDefaults, SkillLoader, SkillManifest};
pub use types::{Skill, SkillDefinition, SkillStatus};
pub use verifier::{
    SkillOutcome, SkillVerifier, VerificationResult, VerifierSettings, VerifyAllReport,
};
