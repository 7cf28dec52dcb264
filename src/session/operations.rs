//! 待处理操作的取消令牌登记表
//!
//! 每个会话只有一个槽位：登记新令牌会先取消并替换旧令牌；进入 error / terminated 时整槽作废。

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 单槽取消令牌表
#[derive(Debug, Default)]
pub struct OperationRegistry {
    slots: Mutex<HashMap<String, CancellationToken>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新操作：取消旧令牌，返回新令牌
    pub fn register(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let Ok(mut slots) = self.slots.lock() else {
            // 表已中毒：返回一个无人持有的令牌，行为等同于未跟踪
            return token;
        };
        if let Some(previous) = slots.insert(session_id.to_string(), token.clone()) {
            previous.cancel();
        }
        token
    }

    /// 取当前仍存活的令牌；没有则登记一个
    pub fn current_or_register(&self, session_id: &str) -> CancellationToken {
        if let Ok(slots) = self.slots.lock() {
            if let Some(token) = slots.get(session_id).filter(|t| !t.is_cancelled()) {
                return token.clone();
            }
        }
        self.register(session_id)
    }

    /// 取消并清空槽位；返回是否真的取消了一个令牌
    pub fn cancel(&self, session_id: &str) -> bool {
        let removed = self
            .slots
            .lock()
            .ok()
            .and_then(|mut slots| slots.remove(session_id));
        match removed {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.get(session_id).is_some_and(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }
}
