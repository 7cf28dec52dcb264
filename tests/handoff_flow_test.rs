//! 端到端流程：会话 + 技能验证 + 持久化重启

use std::sync::Arc;
use std::time::Duration;

use handoff::core::ErrorCode;
use handoff::network::{MockNetworkClient, MockReply};
use handoff::session::{SessionManager, SessionSettings, SessionStatus};
use handoff::skills::{parse_manifest, SkillStatus, SkillVerifier, VerifierSettings};
use handoff::storage::{JsonFileStore, KeyValueStore};
use serde_json::json;

const MANIFEST: &str = r#"
[defaults]
model = "sonnet"
timeout = 60000

[[skills]]
id = "local"
name = "local"

[[skills]]
id = "remote"
name = "remote"
verificationUrl = "https://skills.test/remote"
"#;

fn fast_settings() -> VerifierSettings {
    let mut settings = VerifierSettings::default();
    settings.retry.base_delay = Duration::from_millis(5);
    settings.retry.max_delay = Duration::from_millis(20);
    settings
}

#[tokio::test]
async fn test_verify_all_hands_off_session() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(dir.path().join("s.json")));
    let sessions = Arc::new(SessionManager::new(SessionSettings::default(), store));

    let mock = MockNetworkClient::new()
        .with_reply("https://skills.test/remote", MockReply::http(502, "Bad Gateway"))
        .with_reply("https://skills.test/remote", MockReply::ok());
    let verifier = SkillVerifier::new(sessions.clone(), Arc::new(mock), fast_settings());

    let manifest = parse_manifest(MANIFEST).unwrap();
    manifest.register_all(&verifier).await;

    let config = manifest.defaults.session_config("fallback");
    sessions.create_session("s1", "flow", config).await.unwrap();
    sessions.start_session("s1").await.unwrap();

    let report = verifier
        .verify_all_skills(Some("s1"), Duration::from_secs(1))
        .await;
    assert!(!report.timed_out);
    assert_eq!(report.verified_count(), 2);
    assert!(verifier.are_all_skills_verified().await);

    let session = sessions.get_session("s1").await.unwrap();
    assert!(session.system_sent);
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.config.model, "sonnet");
    assert_eq!(session.config.timeout, 60_000);
}

#[tokio::test]
async fn test_failed_skill_errors_session_and_clears_flag() {
    let sessions = Arc::new(SessionManager::new(
        SessionSettings::default(),
        Arc::new(handoff::storage::MemoryStore::new()),
    ));
    let mock = MockNetworkClient::new()
        .with_reply("https://skills.test/ok", MockReply::ok())
        .with_reply("https://skills.test/gone", MockReply::http(410, "Gone"));
    let verifier = SkillVerifier::new(sessions.clone(), Arc::new(mock), fast_settings());
    verifier
        .register_skill("ok", "ok", "OK", Some("https://skills.test/ok".into()))
        .await;
    verifier
        .register_skill("gone", "gone", "Gone", Some("https://skills.test/gone".into()))
        .await;

    sessions
        .create_session("s1", "flow", json!({"model": "m"}))
        .await
        .unwrap();
    sessions.start_session("s1").await.unwrap();
    verifier
        .verify_skill("ok", Some("s1"), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(sessions.get_session("s1").await.unwrap().system_sent);

    let err = verifier
        .verify_skill("gone", Some("s1"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::VerificationError);

    let session = sessions.get_session("s1").await.unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert!(!session.system_sent);
    assert_eq!(
        verifier.get_skill("gone").await.unwrap().status,
        SkillStatus::Failed
    );
}

#[tokio::test]
async fn test_restart_drops_zombies_and_keeps_live_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&path));
        let sessions = SessionManager::new(SessionSettings::default(), store);
        sessions
            .create_session("zombie", "z", json!({"model": "m", "timeout": 30}))
            .await
            .unwrap();
        sessions.start_session("zombie").await.unwrap();
        sessions.mark_system_sent("zombie").await.unwrap();

        sessions
            .create_session("live", "l", json!({"model": "m", "timeout": 30}))
            .await
            .unwrap();
        sessions.start_session("live").await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&path));
    let sessions = SessionManager::new(SessionSettings::default(), store);
    assert_eq!(sessions.load().await, 1);
    assert!(sessions.get_session("zombie").await.is_none());
    let live = sessions.get_session("live").await.unwrap();
    assert_eq!(live.status, SessionStatus::Running);
    assert!(!live.system_sent);
}
