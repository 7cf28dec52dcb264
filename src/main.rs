//! Handoff - 会话生命周期与技能验证
//!
//! 入口：加载配置与会话存储，登记技能清单，创建并启动一个会话，
//! 把全部技能绑定到该会话上验证，最后打印会话与技能快照。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use handoff::config::load_config;
use handoff::network::HttpClient;
use handoff::observability;
use handoff::session::{spawn_zombie_sweeper, SessionManager};
use handoff::skills::{SkillLoader, SkillVerifier};
use handoff::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let store: Arc<dyn KeyValueStore> = match &config.storage.path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let sessions = Arc::new(SessionManager::new(config.session.settings(), store));
    let restored = sessions.load().await;
    tracing::info!("{} started with {} restored sessions", config.app.name, restored);

    let shutdown = CancellationToken::new();
    let sweeper = spawn_zombie_sweeper(
        Arc::clone(&sessions),
        config.session.sweep_interval(),
        shutdown.clone(),
    );

    let manifest = SkillLoader::new(&config.app.skills_manifest)
        .load()
        .context("Failed to load skill manifest")?;
    let mut verifier_settings = config.verifier.settings();
    manifest.defaults.apply_to(&mut verifier_settings);
    let verifier = SkillVerifier::new(
        Arc::clone(&sessions),
        Arc::new(HttpClient::new()),
        verifier_settings,
    );
    manifest.register_all(&verifier).await;

    let session_id = uuid::Uuid::new_v4().to_string();
    let session_config = manifest
        .defaults
        .session_config(&config.session.default_model);
    sessions
        .create_session(&session_id, &config.app.name, session_config)
        .await
        .context("Failed to create session")?;
    sessions.start_session(&session_id).await;

    let timeout = manifest
        .defaults
        .verification_timeout
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| config.verifier.request_timeout());
    let report = verifier.verify_all_skills(Some(&session_id), timeout).await;
    for (skill_id, err) in report.failures() {
        tracing::warn!("Skill '{}' not available: {}", skill_id, err);
    }
    if verifier.are_all_skills_verified().await {
        tracing::info!("All skills verified for session {}", session_id);
    }

    let zombies = sessions.cleanup_zombies().await;
    if zombies > 0 {
        tracing::info!("Terminated {} zombie sessions", zombies);
    }

    let sessions_view = sessions.subscribe().borrow().clone();
    let skills_view = verifier.subscribe().borrow().clone();
    println!("{}", serde_json::to_string_pretty(&sessions_view)?);
    println!("{}", serde_json::to_string_pretty(&skills_view)?);

    shutdown.cancel();
    sweeper.await.context("Sweeper task failed")?;
    Ok(())
}
