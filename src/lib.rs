//! Handoff - 会话生命周期与技能验证核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误码与错误记录、错误分类与重试策略、可订阅的状态快照
//! - **network**: 网络客户端抽象与实现（reqwest / Mock）
//! - **observability**: 日志初始化
//! - **session**: 会话状态机、僵尸检测、取消令牌、持久化自愈
//! - **skills**: 技能注册、合流验证、清单加载
//! - **storage**: 键值存储（内存 / JSON 文件）
//! - **validation**: 配置键集合的严格校验

pub mod config;
pub mod core;
pub mod network;
pub mod observability;
pub mod session;
pub mod skills;
pub mod storage;
pub mod validation;

pub use session::{Session, SessionManager, SessionStatus};
pub use skills::{Skill, SkillStatus, SkillVerifier};
