//! 僵尸会话后台清扫
//!
//! 按固定间隔调用 cleanup_zombies，直到 shutdown 令牌触发。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SessionManager;

/// 启动清扫任务；返回的 JoinHandle 在 shutdown 后结束
pub fn spawn_zombie_sweeper(
    manager: Arc<SessionManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Zombie sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let terminated = manager.cleanup_zombies().await;
                    if terminated > 0 {
                        tracing::info!("Sweeper terminated {} zombie sessions", terminated);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionSettings, SessionStatus};
    use crate::storage::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_sweeper_terminates_zombie_and_stops() {
        let manager = Arc::new(SessionManager::new(
            SessionSettings::default(),
            Arc::new(MemoryStore::new()),
        ));
        manager
            .create_session("z", "zombie", json!({"model": "m", "timeout": 20}))
            .await
            .unwrap();
        manager.start_session("z").await.unwrap();
        manager.mark_system_sent("z").await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_zombie_sweeper(manager.clone(), Duration::from_millis(25), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            manager.get_session("z").await.unwrap().status,
            SessionStatus::Terminated
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
