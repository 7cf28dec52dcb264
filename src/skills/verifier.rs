//! 技能验证器
//!
//! 持有技能记录与「每技能一条在途验证链」的表。验证链在独立任务中运行，
//! 同一技能的并发调用方通过 Shared 句柄合流，拿到完全相同的结果。
//!
//! 一条链的流程：
//! 1. 状态置 Verifying；绑定会话时取该会话的单槽取消令牌
//! 2. 每次请求受 timeout 与令牌双重约束；退避睡眠同样受令牌约束
//! 3. 成功 → Verified，并对发起方与合流方绑定的会话调用 mark_system_sent
//! 4. 外部取消 → Failed / VERIFICATION_CANCELLED，不重试
//! 5. 其它失败 → 分类；可恢复且仍有预算则退避重试，否则 Failed 并 error_session

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::types::{Skill, SkillStatus};
use crate::core::{
    is_network_error, is_recoverable_error, RetryPolicy, SkillsView, VerificationError,
};
use crate::network::{NetworkClient, NetworkError, NetworkRequest, NetworkResponse};
use crate::session::SessionManager;

/// 一次验证的终态结果
pub type VerificationResult = Result<Skill, VerificationError>;

type SharedVerification = Shared<BoxFuture<'static, VerificationResult>>;

/// 被外部强制落定时，合流调用方应看到的错误
type ForcedOutcome = Arc<std::sync::Mutex<Option<VerificationError>>>;

/// 每个技能的验证状态；表中没有条目即「未开始」
enum AttemptState {
    InFlight {
        generation: u64,
        handle: SharedVerification,
        abort: AbortHandle,
        forced: ForcedOutcome,
    },
    Completed(VerificationResult),
}

/// 验证器参数
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub retry: RetryPolicy,
    /// verify_all 的总期限 = 单技能 timeout × 该系数
    pub aggregate_timeout_factor: u32,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            aggregate_timeout_factor: 2,
        }
    }
}

/// 单个技能在 verify_all 中的结果
#[derive(Debug, Clone)]
pub struct SkillOutcome {
    pub skill_id: String,
    pub result: VerificationResult,
}

/// verify_all_skills 的汇总
#[derive(Debug, Clone, Default)]
pub struct VerifyAllReport {
    pub outcomes: Vec<SkillOutcome>,
    /// 总期限先到，有技能被强制判超时
    pub timed_out: bool,
}

impl VerifyAllReport {
    pub fn verified_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &VerificationError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.skill_id.as_str(), e)))
    }
}

struct VerifierInner {
    skills: RwLock<HashMap<String, Skill>>,
    attempts: Mutex<HashMap<String, AttemptState>>,
    sessions: Arc<SessionManager>,
    network: Arc<dyn NetworkClient>,
    settings: VerifierSettings,
    next_generation: AtomicU64,
    view_tx: watch::Sender<SkillsView>,
}

/// 技能验证器（可廉价 clone 的句柄）
#[derive(Clone)]
pub struct SkillVerifier {
    inner: Arc<VerifierInner>,
}

impl SkillVerifier {
    pub fn new(
        sessions: Arc<SessionManager>,
        network: Arc<dyn NetworkClient>,
        settings: VerifierSettings,
    ) -> Self {
        let (view_tx, _) = watch::channel(SkillsView::default());
        Self {
            inner: Arc::new(VerifierInner {
                skills: RwLock::new(HashMap::new()),
                attempts: Mutex::new(HashMap::new()),
                sessions,
                network,
                settings,
                next_generation: AtomicU64::new(1),
                view_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SkillsView> {
        self.inner.view_tx.subscribe()
    }

    /// 注册技能（同 id 重复注册会替换记录，并作废其在途验证）
    pub async fn register_skill(
        &self,
        id: &str,
        name: &str,
        display_name: &str,
        verification_url: Option<String>,
    ) -> Skill {
        let skill = Skill::new(id, name, display_name, verification_url);
        let mut attempts = self.inner.attempts.lock().await;
        abort_in_flight(&mut attempts, id, VerificationError::Cancelled);
        attempts.remove(id);
        let mut skills = self.inner.skills.write().await;
        skills.insert(id.to_string(), skill.clone());
        self.inner.publish(&skills, &attempts, None);
        tracing::debug!("Registered skill '{}'", id);
        skill
    }

    pub async fn get_skill(&self, id: &str) -> Option<Skill> {
        self.inner.skills.read().await.get(id).cloned()
    }

    pub async fn list_skills(&self) -> Vec<Skill> {
        sorted(&*self.inner.skills.read().await)
    }

    /// 最近一次已完成验证的结果
    pub async fn last_outcome(&self, id: &str) -> Option<VerificationResult> {
        match self.inner.attempts.lock().await.get(id) {
            Some(AttemptState::Completed(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// 验证单个技能；同一技能已有在途链时直接合流
    pub async fn verify_skill(
        &self,
        skill_id: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> VerificationResult {
        let (handle, joined) = {
            let mut attempts = self.inner.attempts.lock().await;
            if let Some(AttemptState::InFlight { handle, .. }) = attempts.get(skill_id) {
                tracing::debug!("Joining in-flight verification of '{}'", skill_id);
                (handle.clone(), true)
            } else {
                let mut skills = self.inner.skills.write().await;
                let Some(skill) = skills.get_mut(skill_id) else {
                    return Err(VerificationError::SkillNotFound(skill_id.to_string()));
                };
                if skill.status == SkillStatus::Disabled {
                    return Err(VerificationError::Disabled(skill_id.to_string()));
                }

                let Some(url) = skill.verification_url.clone() else {
                    mark_verified(skill);
                    let result: VerificationResult = Ok(skill.clone());
                    attempts.insert(skill_id.to_string(), AttemptState::Completed(result.clone()));
                    self.inner.publish(&skills, &attempts, None);
                    drop(skills);
                    drop(attempts);
                    if let Some(session_id) = session_id {
                        self.inner.sessions.mark_system_sent(session_id).await;
                    }
                    return result;
                };

                skill.status = SkillStatus::Verifying;
                skill.error = None;
                skill.retry_count = 0;

                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let chain = run_chain(
                    Arc::clone(&self.inner),
                    generation,
                    skill_id.to_string(),
                    url,
                    session_id.map(str::to_string),
                    timeout,
                );
                let task = tokio::spawn(chain);
                let abort = task.abort_handle();
                let forced: ForcedOutcome = Arc::default();
                let handle = joinable(task, Arc::clone(&forced));

                attempts.insert(
                    skill_id.to_string(),
                    AttemptState::InFlight {
                        generation,
                        handle: handle.clone(),
                        abort,
                        forced,
                    },
                );
                self.inner.publish(&skills, &attempts, None);
                (handle, false)
            }
        };
        let result = handle.await;
        // 链只替发起方的会话交接；合流方各自的会话在成功后补上
        if joined && result.is_ok() {
            if let Some(session_id) = session_id {
                self.inner.sessions.mark_system_sent(session_id).await;
            }
        }
        result
    }

    /// 并发验证所有未验证技能，总期限为 timeout × aggregate_timeout_factor。
    ///
    /// 期限先到时，仍处于 Verifying 的技能被强制落定为 Failed / VERIFICATION_TIMEOUT。
    pub async fn verify_all_skills(
        &self,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> VerifyAllReport {
        let mut ids: Vec<String> = self
            .inner
            .skills
            .read()
            .await
            .values()
            .filter(|s| s.status == SkillStatus::Unverified)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        if ids.is_empty() {
            return VerifyAllReport::default();
        }

        let deadline = timeout.saturating_mul(self.inner.settings.aggregate_timeout_factor.max(1));
        tracing::info!("Verifying {} skills (deadline {:?})", ids.len(), deadline);

        let verifications = ids
            .iter()
            .map(|id| self.verify_skill(id, session_id, timeout));
        let timed_out = match tokio::time::timeout(deadline, join_all(verifications)).await {
            Ok(_) => false,
            Err(_) => {
                let forced = self.force_resolve_pending().await;
                tracing::warn!("Verify-all deadline elapsed, {} skills timed out", forced);
                true
            }
        };

        let attempts = self.inner.attempts.lock().await;
        let outcomes = ids
            .into_iter()
            .map(|id| {
                let result = match attempts.get(&id) {
                    Some(AttemptState::Completed(result)) => result.clone(),
                    _ => Err(VerificationError::Timeout(format!(
                        "no result for '{id}' within {deadline:?}"
                    ))),
                };
                SkillOutcome { skill_id: id, result }
            })
            .collect();
        VerifyAllReport { outcomes, timed_out }
    }

    /// 把所有仍在 Verifying 的技能强制判为超时，返回条数
    async fn force_resolve_pending(&self) -> usize {
        let mut attempts = self.inner.attempts.lock().await;
        let mut skills = self.inner.skills.write().await;
        let mut count = 0;
        for skill in skills.values_mut() {
            if skill.status != SkillStatus::Verifying {
                continue;
            }
            let err = VerificationError::Timeout(format!(
                "verification of '{}' exceeded the aggregate deadline",
                skill.id
            ));
            abort_in_flight(&mut attempts, &skill.id, err.clone());
            skill.status = SkillStatus::Failed;
            skill.error = Some(err.to_record());
            attempts.insert(skill.id.clone(), AttemptState::Completed(Err(err)));
            count += 1;
        }
        let last_error = (count > 0).then(|| format!("{count} skills timed out"));
        self.inner.publish(&skills, &attempts, last_error);
        count
    }

    /// 禁用：作废在途验证，不再参与 verify_all 与全量校验
    pub async fn disable_skill(&self, id: &str) -> Option<Skill> {
        let mut attempts = self.inner.attempts.lock().await;
        let mut skills = self.inner.skills.write().await;
        let skill = skills.get_mut(id)?;
        let err = VerificationError::Disabled(id.to_string());
        if abort_in_flight(&mut attempts, id, err.clone()) {
            attempts.insert(id.to_string(), AttemptState::Completed(Err(err)));
        }
        skill.status = SkillStatus::Disabled;
        let snapshot = skill.clone();
        self.inner.publish(&skills, &attempts, None);
        tracing::info!("Disabled skill '{}'", id);
        Some(snapshot)
    }

    /// 启用：仅对 Disabled 生效，回到 Unverified
    pub async fn enable_skill(&self, id: &str) -> Option<Skill> {
        let attempts = self.inner.attempts.lock().await;
        let mut skills = self.inner.skills.write().await;
        let skill = skills.get_mut(id)?;
        if skill.status == SkillStatus::Disabled {
            skill.status = SkillStatus::Unverified;
            skill.error = None;
            skill.retry_count = 0;
        }
        let snapshot = skill.clone();
        self.inner.publish(&skills, &attempts, None);
        Some(snapshot)
    }

    /// 重置为 Unverified 并清除错误与历史结果；Disabled 的技能保持不变
    pub async fn reset_skill(&self, id: &str) -> Option<Skill> {
        let mut attempts = self.inner.attempts.lock().await;
        let mut skills = self.inner.skills.write().await;
        let skill = skills.get_mut(id)?;
        if skill.status != SkillStatus::Disabled {
            abort_in_flight(&mut attempts, id, VerificationError::Cancelled);
            attempts.remove(id);
            skill.status = SkillStatus::Unverified;
            skill.error = None;
            skill.retry_count = 0;
            skill.last_verified = None;
        }
        let snapshot = skill.clone();
        self.inner.publish(&skills, &attempts, None);
        Some(snapshot)
    }

    /// 所有未禁用的技能都已 Verified
    pub async fn are_all_skills_verified(&self) -> bool {
        self.inner
            .skills
            .read()
            .await
            .values()
            .filter(|s| s.status != SkillStatus::Disabled)
            .all(|s| s.status == SkillStatus::Verified)
    }
}

impl VerifierInner {
    /// 仅当 generation 仍是该技能的在途链时才修改记录；返回修改后的快照
    async fn update_if_current<F>(&self, generation: u64, skill_id: &str, f: F) -> Option<Skill>
    where
        F: FnOnce(&mut Skill),
    {
        let attempts = self.attempts.lock().await;
        if !is_current(&attempts, skill_id, generation) {
            return None;
        }
        let mut skills = self.skills.write().await;
        let skill = skills.get_mut(skill_id)?;
        f(skill);
        let snapshot = skill.clone();
        self.publish(&skills, &attempts, None);
        Some(snapshot)
    }

    /// 落定验证链：写记录并把在途条目替换为 Completed。链已被作废时返回 None。
    async fn settle(
        &self,
        generation: u64,
        skill_id: &str,
        failure: Option<VerificationError>,
    ) -> Option<VerificationResult> {
        let mut attempts = self.attempts.lock().await;
        if !is_current(&attempts, skill_id, generation) {
            return None;
        }
        let mut skills = self.skills.write().await;
        let skill = skills.get_mut(skill_id)?;
        let result = match failure {
            None => {
                mark_verified(skill);
                Ok(skill.clone())
            }
            Some(err) => {
                skill.status = SkillStatus::Failed;
                skill.error = Some(err.to_record());
                Err(err)
            }
        };
        attempts.insert(skill_id.to_string(), AttemptState::Completed(result.clone()));
        let last_error = result.as_ref().err().map(|e| format!("{skill_id}: {e}"));
        self.publish(&skills, &attempts, last_error);
        Some(result)
    }

    fn publish(
        &self,
        skills: &HashMap<String, Skill>,
        attempts: &HashMap<String, AttemptState>,
        error: Option<String>,
    ) {
        let snapshot = sorted(skills);
        let verifying = attempts
            .values()
            .any(|a| matches!(a, AttemptState::InFlight { .. }));
        self.view_tx.send_modify(|view| {
            view.skills = snapshot;
            view.verifying = verifying;
            if error.is_some() {
                view.last_error = error;
            }
        });
    }
}

fn sorted(skills: &HashMap<String, Skill>) -> Vec<Skill> {
    let mut list: Vec<Skill> = skills.values().cloned().collect();
    list.sort_by(|a, b| a.id.cmp(&b.id));
    list
}

fn mark_verified(skill: &mut Skill) {
    skill.status = SkillStatus::Verified;
    skill.retry_count = 0;
    skill.last_verified = Some(Utc::now());
    skill.error = None;
}

fn is_current(attempts: &HashMap<String, AttemptState>, skill_id: &str, generation: u64) -> bool {
    matches!(
        attempts.get(skill_id),
        Some(AttemptState::InFlight { generation: g, .. }) if *g == generation
    )
}

/// 作废在途链：记下合流方应看到的错误并中止任务；返回是否确有在途链
fn abort_in_flight(
    attempts: &mut HashMap<String, AttemptState>,
    skill_id: &str,
    outcome: VerificationError,
) -> bool {
    let Some(AttemptState::InFlight { abort, forced, .. }) = attempts.get(skill_id) else {
        return false;
    };
    if let Ok(mut slot) = forced.lock() {
        *slot = Some(outcome);
    }
    abort.abort();
    attempts.remove(skill_id);
    true
}

/// 把验证任务包装成可合流的句柄；被强制落定时优先返回强制结果
fn joinable(
    task: tokio::task::JoinHandle<VerificationResult>,
    forced: ForcedOutcome,
) -> SharedVerification {
    async move {
        let joined = task.await;
        if let Some(err) = forced.lock().ok().and_then(|slot| slot.clone()) {
            return Err(err);
        }
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(VerificationError::Cancelled),
            Err(e) => Err(VerificationError::Failed {
                message: format!("verification task failed: {e}"),
                recoverable: false,
            }),
        }
    }
    .boxed()
    .shared()
}

/// 一次受约束的网络调用：外部取消、自身超时、调用完成三者取先到者
async fn bounded_call(
    network: &dyn NetworkClient,
    request: NetworkRequest,
    token: &CancellationToken,
    timeout: Duration,
) -> Result<NetworkResponse, NetworkError> {
    if token.is_cancelled() {
        return Err(NetworkError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(NetworkError::Cancelled),
        _ = tokio::time::sleep(timeout) => Err(NetworkError::Timeout(timeout)),
        result = network.call(request, token.clone(), timeout) => result,
    }
}

/// 重试耗尽或不可恢复时的错误归类
fn classify_failure(err: &NetworkError, recoverable: bool) -> VerificationError {
    match err {
        NetworkError::Cancelled => VerificationError::Cancelled,
        NetworkError::Timeout(after) => {
            VerificationError::Timeout(format!("no answer within {after:?}"))
        }
        _ if is_network_error(err) => VerificationError::Network {
            message: err.to_string(),
            recoverable,
        },
        _ => VerificationError::Failed {
            message: err.to_string(),
            recoverable,
        },
    }
}

/// 验证链本体（在独立任务中运行）
async fn run_chain(
    inner: Arc<VerifierInner>,
    generation: u64,
    skill_id: String,
    url: String,
    session_id: Option<String>,
    timeout: Duration,
) -> VerificationResult {
    let token = match &session_id {
        Some(id) => inner.sessions.operation_token(id),
        None => CancellationToken::new(),
    };
    let retry = inner.settings.retry;
    let superseded = || Err(VerificationError::Cancelled);

    let mut attempt: u32 = 0;
    loop {
        let request = NetworkRequest::get(&url);
        let err = match bounded_call(inner.network.as_ref(), request, &token, timeout).await {
            Ok(_) => {
                let Some(result) = inner.settle(generation, &skill_id, None).await else {
                    return superseded();
                };
                tracing::info!("Skill '{}' verified", skill_id);
                if let Some(session_id) = &session_id {
                    if inner.sessions.mark_system_sent(session_id).await.is_none() {
                        tracing::warn!(
                            "Skill '{}' verified but session '{}' is not running",
                            skill_id,
                            session_id
                        );
                    }
                }
                return result;
            }
            Err(NetworkError::Cancelled) => break,
            Err(err) => err,
        };

        let recoverable = is_recoverable_error(&err);
        if recoverable && attempt < retry.max_retries {
            let delay = retry.calculate_retry_delay(attempt);
            attempt += 1;
            tracing::warn!(
                "Verification of '{}' failed ({}), retry {}/{} in {:?}",
                skill_id,
                err,
                attempt,
                retry.max_retries,
                delay
            );
            inner
                .update_if_current(generation, &skill_id, |skill| skill.retry_count = attempt)
                .await;
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => continue,
            }
        }

        let failure = classify_failure(&err, recoverable);
        let Some(result) = inner.settle(generation, &skill_id, Some(failure.clone())).await else {
            return superseded();
        };
        tracing::warn!("Skill '{}' failed verification: {}", skill_id, failure);
        if let Some(session_id) = &session_id {
            inner.sessions.error_session(session_id, failure.to_record()).await;
        }
        return result;
    }

    // 外部取消：落定为 Failed / VERIFICATION_CANCELLED，不重试、不改会话
    tracing::info!("Verification of '{}' cancelled", skill_id);
    inner
        .settle(generation, &skill_id, Some(VerificationError::Cancelled))
        .await
        .unwrap_or_else(superseded)
}
