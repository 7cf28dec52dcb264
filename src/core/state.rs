//! 对外只读投影：会话表与技能表的快照
//!
//! 服务内部持有权威记录，每次变更后把整表投影到 watch 通道；消费方只能读，不能改。

use serde::Serialize;

use crate::session::Session;
use crate::skills::Skill;

/// 会话表投影
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsView {
    pub sessions: Vec<Session>,
    /// 正在从存储加载
    pub loading: bool,
    pub last_error: Option<String>,
}

/// 技能表投影
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsView {
    pub skills: Vec<Skill>,
    /// 是否有验证链在途
    pub verifying: bool,
    pub last_error: Option<String>,
}

impl SessionsView {
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }
}

impl SkillsView {
    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.id == id)
    }
}
