//! Background eviction of idle sessions

use chrono::Utc;
use propforge_common::context::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sweep `store` every `interval` until `shutdown` fires
pub fn spawn_session_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = store.evict_idle(Utc::now());
                    debug!(evicted = evicted, active = store.session_count(), "Session sweep");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use propforge_common::context::{AnalyzerConfig, ConversationTurn, MemoryConfig};

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let library = Arc::new(AnalyzerConfig::default().load_library().unwrap());
        let config = MemoryConfig { idle_ttl_secs: 0, ..Default::default() };
        let store = Arc::new(SessionStore::new(config, library));
        store.append("idle", ConversationTurn::user("villas in Arabian Ranches")).await;
        assert_eq!(store.session_count(), 1);

        let shutdown = CancellationToken::new();
        let handle = spawn_session_sweeper(store.clone(), Duration::from_millis(10), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.session_count(), 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
