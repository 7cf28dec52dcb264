//! 会话生命周期
//!
//! - **types**: Session 记录、状态、配置、部分更新
//! - **manager**: 状态机、单标志不变式、僵尸检测、加载自愈
//! - **operations**: 每会话单槽取消令牌
//! - **sweeper**: 僵尸会话后台清扫

mod manager;
mod operations;
mod sweeper;
mod types;

pub use manager::{is_zombie_at, SessionManager, SessionSettings, SESSIONS_STORAGE_KEY};
pub use operations::OperationRegistry;
pub use sweeper::spawn_zombie_sweeper;
pub use types::{Session, SessionConfig, SessionStats, SessionStatus, SessionUpdate, StatsUpdate};
