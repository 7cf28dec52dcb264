//! 会话管理器
//!
//! 持有全部会话的权威记录与单槽取消令牌表。所有变更都是「读快照 → 合并 → 整条写回」，
//! 在同一把写锁内完成，任何读者都看不到半新半旧的记录。
//!
//! 不变式：
//! - system_sent 只能由 mark_system_sent 置 true，且当时状态必须是 Running
//! - 状态离开 Running（尤其进入 Error / Terminated）的同一次更新里 system_sent 被清零
//! - Terminated 之后的任何操作都是空操作，直到 delete_session

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use super::operations::OperationRegistry;
use super::types::{Session, SessionConfigInput, SessionStatus, SessionUpdate, StatsUpdate};
use crate::core::{ErrorRecord, SessionError, SessionsView};
use crate::storage::KeyValueStore;
use crate::validation::{self, ConfigKind, Defect, Diagnostics};

/// 会话表在存储中的固定键
pub const SESSIONS_STORAGE_KEY: &str = "handoff.sessions";

/// 会话管理器参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// 配置里未给 timeout 时使用（毫秒）
    pub default_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 300_000,
        }
    }
}

/// 是否为僵尸：标志声称已交接，但超过 timeout 没有任何活动
pub fn is_zombie_at(session: &Session, now: DateTime<Utc>) -> bool {
    if !session.system_sent {
        return false;
    }
    if matches!(session.status, SessionStatus::Terminated | SessionStatus::Error) {
        return false;
    }
    let idle_ms = (now - session.stats.last_activity_time).num_milliseconds();
    idle_ms > i64::try_from(session.config.timeout).unwrap_or(i64::MAX)
}

/// 校验并解析一条持久化记录：config 键集合越界、或标志与状态矛盾则整条拒绝
fn parse_record(raw: &Value) -> Result<Session, Diagnostics> {
    let invalid = |message: String| Diagnostics {
        kind: ConfigKind::Session,
        defects: vec![Defect::Invalid(message)],
    };
    let config = raw.get("config").unwrap_or(&Value::Null);
    validation::check_keys(ConfigKind::Session, config)?;
    let session: Session = serde_json::from_value(raw.clone()).map_err(|e| invalid(e.to_string()))?;
    if session.system_sent && session.status != SessionStatus::Running {
        return Err(invalid(format!(
            "systemSent is set while status is {:?}",
            session.status
        )));
    }
    Ok(session)
}

/// 会话管理器
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    operations: OperationRegistry,
    store: Arc<dyn KeyValueStore>,
    settings: SessionSettings,
    view_tx: watch::Sender<SessionsView>,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, store: Arc<dyn KeyValueStore>) -> Self {
        let (view_tx, _) = watch::channel(SessionsView::default());
        Self {
            sessions: RwLock::new(HashMap::new()),
            operations: OperationRegistry::new(),
            store,
            settings,
            view_tx,
        }
    }

    /// 订阅会话表投影
    pub fn subscribe(&self) -> watch::Receiver<SessionsView> {
        self.view_tx.subscribe()
    }

    /// 从存储加载会话表，返回保留下来的条数。
    ///
    /// 整块数据损坏时重置为空表；单条记录校验失败或已是僵尸则丢弃。清理后的表会写回存储。
    pub async fn load(&self) -> usize {
        self.view_tx.send_modify(|v| v.loading = true);
        let now = Utc::now();

        let loaded = match self.store.get_or(SESSIONS_STORAGE_KEY, Value::Object(Default::default())) {
            Ok(Value::Object(entries)) => {
                let mut kept = HashMap::new();
                for (id, raw) in entries {
                    match parse_record(&raw) {
                        Ok(session) if is_zombie_at(&session, now) => {
                            tracing::info!("Dropping zombie session '{}' on load", id);
                        }
                        Ok(session) => {
                            kept.insert(session.id.clone(), session);
                        }
                        Err(diagnostics) => {
                            tracing::warn!("Rejecting persisted session '{}': {}", id, diagnostics);
                        }
                    }
                }
                kept
            }
            Ok(other) => {
                tracing::warn!("Persisted sessions are not a map ({}), resetting", other);
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted sessions ({}), resetting", e);
                HashMap::new()
            }
        };

        let count = loaded.len();
        let mut sessions = self.sessions.write().await;
        *sessions = loaded;
        let persist_error = self.persist(&sessions);
        self.publish(&sessions, persist_error, false);
        tracing::info!("Loaded {} sessions", count);
        count
    }

    /// 创建会话：Idle、标志为 false、统计清零、timeout 缺省时取默认值
    pub async fn create_session(
        &self,
        id: &str,
        name: &str,
        config: Value,
    ) -> Result<Session, SessionError> {
        let input: SessionConfigInput =
            validation::validate(ConfigKind::Session, &config).map_err(SessionError::InvalidConfig)?;
        let session = Session::new(
            id.to_string(),
            name.to_string(),
            input.into_config(self.settings.default_timeout_ms),
        );

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(SessionError::AlreadyExists(id.to_string()));
        }
        sessions.insert(id.to_string(), session.clone());
        let persist_error = self.persist(&sessions);
        self.publish(&sessions, persist_error, false);
        tracing::info!("Created session '{}' ({})", id, name);
        Ok(session)
    }

    /// 整条替换的唯一入口。f 返回 None 表示拒绝（记录不变）。
    async fn replace_with<F>(&self, id: &str, f: F) -> Option<Session>
    where
        F: FnOnce(&Session) -> Option<Session>,
    {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(id)?;
        if current.is_terminated() {
            return None;
        }
        let mut next = f(current)?;
        if next.status != SessionStatus::Running {
            next.system_sent = false;
        }
        let now = Utc::now();
        next.updated_at = now;
        next.stats.last_activity_time = now;

        sessions.insert(id.to_string(), next.clone());
        let persist_error = self.persist(&sessions);
        self.publish(&sessions, persist_error, false);
        Some(next)
    }

    /// 启动：Running，并显式重申 system_sent = false
    pub async fn start_session(&self, id: &str) -> Option<Session> {
        let started = self
            .replace_with(id, |current| {
                let mut next = current.clone();
                next.status = SessionStatus::Running;
                next.system_sent = false;
                next.error = None;
                next.stats.start_time.get_or_insert_with(Utc::now);
                Some(next)
            })
            .await;
        if started.is_some() {
            tracing::info!("Session '{}' started", id);
        }
        started
    }

    /// 置位交接标志的唯一合法途径；仅 Running 时成功，否则拒绝且记录不变
    pub async fn mark_system_sent(&self, id: &str) -> Option<Session> {
        let marked = self
            .replace_with(id, |current| {
                if current.status != SessionStatus::Running {
                    return None;
                }
                let mut next = current.clone();
                next.system_sent = true;
                Some(next)
            })
            .await;
        match &marked {
            Some(_) => tracing::debug!("Session '{}' marked system sent", id),
            None => tracing::debug!("mark_system_sent denied for session '{}'", id),
        }
        marked
    }

    /// 进入 Error（可恢复）：取消待处理操作、清零标志、附上带时间戳的错误
    pub async fn error_session(&self, id: &str, error: ErrorRecord) -> Option<Session> {
        self.operations.cancel(id);
        let record = ErrorRecord {
            timestamp: Utc::now(),
            ..error
        };
        tracing::warn!("Session '{}' error [{}]: {}", id, record.code, record.message);
        self.replace_with(id, move |current| {
            let mut next = current.clone();
            next.status = SessionStatus::Error;
            next.system_sent = false;
            next.error = Some(record);
            Some(next)
        })
        .await
    }

    /// 终止：取消待处理操作、清零标志、标记中断。对该 id 终结。
    pub async fn terminate_session(&self, id: &str) -> Option<Session> {
        self.operations.cancel(id);
        let terminated = self
            .replace_with(id, |current| {
                let mut next = current.clone();
                next.status = SessionStatus::Terminated;
                next.system_sent = false;
                next.interrupted = true;
                Some(next)
            })
            .await;
        if terminated.is_some() {
            tracing::info!("Session '{}' terminated", id);
        }
        terminated
    }

    /// 部分更新：合并到当前快照后整条写回，并刷新 updated_at 与 last_activity_time
    pub async fn update_session(&self, id: &str, update: SessionUpdate) -> Option<Session> {
        if matches!(
            update.status,
            Some(SessionStatus::Error | SessionStatus::Terminated)
        ) {
            self.operations.cancel(id);
        }
        self.replace_with(id, move |current| Some(update.apply(current)))
            .await
    }

    /// 记一轮交互：累加 token 与轮数
    pub async fn record_turn(&self, id: &str, tokens: u64) -> Option<Session> {
        self.replace_with(id, |current| {
            let stats = StatsUpdate {
                total_tokens: Some(current.stats.total_tokens.saturating_add(tokens)),
                turn_count: Some(current.stats.turn_count.saturating_add(1)),
                start_time: None,
            };
            Some(SessionUpdate::default().with_stats(stats).apply(current))
        })
        .await
    }

    /// 删除记录（终结状态的会话只能这样清除）
    pub async fn delete_session(&self, id: &str) -> Option<Session> {
        self.operations.cancel(id);
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id)?;
        let persist_error = self.persist(&sessions);
        self.publish(&sessions, persist_error, false);
        tracing::info!("Deleted session '{}'", id);
        Some(removed)
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        sorted(&sessions)
    }

    pub fn is_zombie(&self, session: &Session) -> bool {
        is_zombie_at(session, Utc::now())
    }

    /// 终止所有僵尸会话，返回终止条数
    pub async fn cleanup_zombies(&self) -> usize {
        let now = Utc::now();
        let candidates: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| is_zombie_at(s, now))
            .map(|s| s.id.clone())
            .collect();

        let mut terminated = 0;
        for id in candidates {
            // 锁内再判一次：扫描之后可能已有新活动
            let result = self
                .replace_with(&id, |current| {
                    if !is_zombie_at(current, Utc::now()) {
                        return None;
                    }
                    let mut next = current.clone();
                    next.status = SessionStatus::Terminated;
                    next.system_sent = false;
                    next.interrupted = true;
                    Some(next)
                })
                .await;
            if result.is_some() {
                self.operations.cancel(&id);
                tracing::warn!("Terminated zombie session '{}'", id);
                terminated += 1;
            }
        }
        if terminated > 0 {
            tracing::info!("Zombie cleanup terminated {} sessions", terminated);
        }
        terminated
    }

    /// 为会话登记新操作；旧令牌被取消
    pub fn register_operation(&self, session_id: &str) -> CancellationToken {
        self.operations.register(session_id)
    }

    /// 取会话当前的令牌，没有存活的则登记一个
    pub fn operation_token(&self, session_id: &str) -> CancellationToken {
        self.operations.current_or_register(session_id)
    }

    pub fn cancel_pending(&self, session_id: &str) -> bool {
        self.operations.cancel(session_id)
    }

    /// 同步写入存储；失败只返回诊断文本，不回滚
    fn persist(&self, sessions: &HashMap<String, Session>) -> Option<String> {
        let value = match serde_json::to_value(sessions) {
            Ok(v) => v,
            Err(e) => return Some(format!("Failed to serialize sessions: {e}")),
        };
        match self.store.set(SESSIONS_STORAGE_KEY, value) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Failed to persist sessions: {}", e);
                Some(format!("Failed to persist sessions: {e}"))
            }
        }
    }

    fn publish(&self, sessions: &HashMap<String, Session>, error: Option<String>, loading: bool) {
        let snapshot = sorted(sessions);
        self.view_tx.send_modify(|view| {
            view.sessions = snapshot;
            view.loading = loading;
            if error.is_some() {
                view.last_error = error;
            }
        });
    }
}

fn sorted(sessions: &HashMap<String, Session>) -> Vec<Session> {
    let mut list: Vec<Session> = sessions.values().cloned().collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;
    use crate::storage::{MemoryStore, StorageError};
    use serde_json::json;
    use std::time::Duration;

    fn manager() -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionManager::new(SessionSettings::default(), store.clone()), store)
    }

    async fn running(manager: &SessionManager, id: &str) -> Session {
        manager
            .create_session(id, "demo", json!({"model": "m"}))
            .await
            .unwrap();
        manager.start_session(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let (manager, _) = manager();
        let session = manager
            .create_session("s1", "demo", json!({"model": "m", "tools": ["search"]}))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(!session.system_sent);
        assert_eq!(session.stats.turn_count, 0);
        assert_eq!(session.config.timeout, 300_000);
        assert_eq!(session.config.tools, Some(vec!["search".to_string()]));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_config_key() {
        let (manager, _) = manager();
        let err = manager
            .create_session("s1", "demo", json!({"model": "m", "temperature": 0.2}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(ref d) if d.has_unexpected_keys()));
        assert!(manager.get_session("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        let err = manager
            .create_session("s1", "again", json!({"model": "m"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_mark_system_sent_requires_running() {
        let (manager, _) = manager();
        manager
            .create_session("s1", "demo", json!({"model": "m"}))
            .await
            .unwrap();
        let before = manager.get_session("s1").await.unwrap();
        assert!(manager.mark_system_sent("s1").await.is_none());
        assert_eq!(manager.get_session("s1").await.unwrap(), before);

        manager.start_session("s1").await.unwrap();
        let marked = manager.mark_system_sent("s1").await.unwrap();
        assert!(marked.system_sent);
        assert_eq!(marked.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_mark_system_sent_denied_after_error_and_terminate() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        manager
            .error_session("s1", ErrorRecord::new("BACKEND_DOWN", "boom", true))
            .await
            .unwrap();
        let errored = manager.get_session("s1").await.unwrap();
        assert!(manager.mark_system_sent("s1").await.is_none());
        assert_eq!(manager.get_session("s1").await.unwrap(), errored);

        manager.terminate_session("s1").await.unwrap();
        let terminated = manager.get_session("s1").await.unwrap();
        assert!(manager.mark_system_sent("s1").await.is_none());
        assert_eq!(manager.get_session("s1").await.unwrap(), terminated);
    }

    #[tokio::test]
    async fn test_error_clears_flag_and_cancels_token() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        manager.mark_system_sent("s1").await.unwrap();
        let token = manager.register_operation("s1");

        let errored = manager
            .error_session("s1", ErrorRecord::new(ErrorCode::NetworkError, "down", true))
            .await
            .unwrap();
        assert_eq!(errored.status, SessionStatus::Error);
        assert!(!errored.system_sent);
        assert_eq!(errored.error.unwrap().code, ErrorCode::NetworkError);
        assert!(token.is_cancelled());

        // 错误不是终态
        let restarted = manager.start_session("s1").await.unwrap();
        assert_eq!(restarted.status, SessionStatus::Running);
        assert!(restarted.error.is_none());
    }

    #[tokio::test]
    async fn test_terminate_is_final_until_deleted() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        let token = manager.register_operation("s1");
        let terminated = manager.terminate_session("s1").await.unwrap();
        assert!(terminated.interrupted);
        assert!(!terminated.system_sent);
        assert!(token.is_cancelled());

        assert!(manager.start_session("s1").await.is_none());
        assert!(manager.update_session("s1", SessionUpdate::status(SessionStatus::Idle)).await.is_none());
        assert_eq!(manager.get_session("s1").await.unwrap(), terminated);

        manager.delete_session("s1").await.unwrap();
        assert!(manager.create_session("s1", "fresh", json!({"model": "m"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_never_leaves_flag_outside_running() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        manager.mark_system_sent("s1").await.unwrap();
        let updated = manager
            .update_session("s1", SessionUpdate::status(SessionStatus::Idle))
            .await
            .unwrap();
        assert!(!updated.system_sent);
    }

    #[tokio::test]
    async fn test_update_bumps_activity_and_merges_stats() {
        let (manager, _) = manager();
        let before = running(&manager, "s1").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.record_turn("s1", 40).await.unwrap();
        let after = manager.record_turn("s1", 2).await.unwrap();
        assert_eq!(after.stats.total_tokens, 42);
        assert_eq!(after.stats.turn_count, 2);
        assert!(after.updated_at > before.updated_at);
        assert!(after.stats.last_activity_time > before.stats.last_activity_time);
        assert_eq!(after.stats.start_time, before.stats.start_time);
    }

    #[tokio::test]
    async fn test_cleanup_zombies() {
        let (manager, _) = manager();
        manager
            .create_session("z", "zombie", json!({"model": "m", "timeout": 100}))
            .await
            .unwrap();
        manager.start_session("z").await.unwrap();
        manager.mark_system_sent("z").await.unwrap();
        running(&manager, "healthy").await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        let zombie = manager.get_session("z").await.unwrap();
        assert!(manager.is_zombie(&zombie));

        assert_eq!(manager.cleanup_zombies().await, 1);
        let cleaned = manager.get_session("z").await.unwrap();
        assert_eq!(cleaned.status, SessionStatus::Terminated);
        assert!(!cleaned.system_sent);
        assert!(cleaned.interrupted);
        assert_eq!(
            manager.get_session("healthy").await.unwrap().status,
            SessionStatus::Running
        );
        assert_eq!(manager.cleanup_zombies().await, 0);
    }

    #[tokio::test]
    async fn test_huge_timeout_is_never_zombie() {
        let (manager, _) = manager();
        manager
            .create_session("s1", "demo", json!({"model": "m", "timeout": u64::MAX}))
            .await
            .unwrap();
        manager.start_session("s1").await.unwrap();
        manager.mark_system_sent("s1").await.unwrap();

        assert_eq!(manager.cleanup_zombies().await, 0);
        let session = manager.get_session("s1").await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.system_sent);
    }

    #[tokio::test]
    async fn test_cleanup_cancels_only_zombie_operations() {
        let (manager, _) = manager();
        manager
            .create_session("z", "zombie", json!({"model": "m", "timeout": 20}))
            .await
            .unwrap();
        manager.start_session("z").await.unwrap();
        manager.mark_system_sent("z").await.unwrap();
        running(&manager, "s1").await;
        manager.mark_system_sent("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let zombie_token = manager.register_operation("z");
        let live_token = manager.register_operation("s1");
        assert_eq!(manager.cleanup_zombies().await, 1);
        assert!(zombie_token.is_cancelled());
        assert!(!live_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_update_to_terminated_matches_terminate() {
        let (manager, _) = manager();
        running(&manager, "s1").await;
        manager.mark_system_sent("s1").await.unwrap();
        let token = manager.register_operation("s1");

        let ended = manager
            .update_session("s1", SessionUpdate::status(SessionStatus::Terminated))
            .await
            .unwrap();
        assert!(ended.interrupted);
        assert!(!ended.system_sent);
        assert!(token.is_cancelled());
        assert!(manager.start_session("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_persists_after_each_mutation() {
        let (manager, store) = manager();
        running(&manager, "s1").await;
        let stored = store.get(SESSIONS_STORAGE_KEY).unwrap().unwrap();
        assert_eq!(stored["s1"]["status"], "running");
    }

    #[tokio::test]
    async fn test_load_rejects_extra_config_keys_and_zombies() {
        let store = Arc::new(MemoryStore::new());
        let seed = SessionManager::new(SessionSettings::default(), store.clone());
        running(&seed, "good").await;
        running(&seed, "drifted").await;
        seed.create_session("stale", "stale", json!({"model": "m", "timeout": 10}))
            .await
            .unwrap();
        seed.start_session("stale").await.unwrap();
        seed.mark_system_sent("stale").await.unwrap();

        let mut blob = store.get(SESSIONS_STORAGE_KEY).unwrap().unwrap();
        blob["drifted"]["config"]["temperature"] = json!(0.7);
        store.set(SESSIONS_STORAGE_KEY, blob).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let reloaded = SessionManager::new(SessionSettings::default(), store.clone());
        assert_eq!(reloaded.load().await, 1);
        assert!(reloaded.get_session("good").await.is_some());
        assert!(reloaded.get_session("drifted").await.is_none());
        assert!(reloaded.get_session("stale").await.is_none());

        let healed = store.get(SESSIONS_STORAGE_KEY).unwrap().unwrap();
        assert!(healed.get("drifted").is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_flag_outside_running() {
        let store = Arc::new(MemoryStore::new());
        let seed = SessionManager::new(SessionSettings::default(), store.clone());
        running(&seed, "errored").await;
        running(&seed, "ended").await;
        seed.create_session("idle", "idle", json!({"model": "m"}))
            .await
            .unwrap();
        running(&seed, "live").await;
        seed.mark_system_sent("live").await.unwrap();

        let mut blob = store.get(SESSIONS_STORAGE_KEY).unwrap().unwrap();
        blob["errored"]["status"] = json!("error");
        blob["errored"]["systemSent"] = json!(true);
        blob["ended"]["status"] = json!("terminated");
        blob["ended"]["systemSent"] = json!(true);
        blob["idle"]["systemSent"] = json!(true);
        store.set(SESSIONS_STORAGE_KEY, blob).unwrap();

        let reloaded = SessionManager::new(SessionSettings::default(), store);
        assert_eq!(reloaded.load().await, 1);
        for id in ["errored", "ended", "idle"] {
            assert!(reloaded.get_session(id).await.is_none(), "{id} survived load");
        }
        let live = reloaded.get_session("live").await.unwrap();
        assert!(live.system_sent);
        assert_eq!(live.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_load_resets_on_corrupt_blob() {
        let store = Arc::new(MemoryStore::new());
        store.set(SESSIONS_STORAGE_KEY, json!("garbage")).unwrap();
        let manager = SessionManager::new(SessionSettings::default(), store);
        assert_eq!(manager.load().await, 0);
        assert!(manager.list_sessions().await.is_empty());
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::Corrupt("unreadable".into()))
        }
        fn set(&self, _key: &str, _value: Value) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk full".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_state() {
        let manager = SessionManager::new(SessionSettings::default(), Arc::new(FailingStore));
        assert_eq!(manager.load().await, 0);
        let view = manager.subscribe();
        let session = running(&manager, "s1").await;
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(manager.get_session("s1").await.unwrap().status, SessionStatus::Running);
        assert!(view.borrow().last_error.as_deref().unwrap().contains("disk full"));
        assert_eq!(view.borrow().sessions.len(), 1);
    }
}
