use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use textale_types::ChannelName;

use crate::error::Result;
use crate::services::Services;

/// Background task that prunes history past each channel's retention window.
///
/// Runs on an interval until `shutdown` fires. Channels without a retention
/// policy in the metadata service are never touched.
pub async fn run_retention_loop(services: Services, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = chrono::Utc::now().timestamp();
        match sweep_expired(&services, now).await {
            Ok(count) => {
                if count > 0 {
                    info!("Retention: pruned {} expired messages", count);
                }
            }
            Err(e) => {
                warn!("Retention sweep error: {}", e);
            }
        }
    }

    info!("Retention loop stopped");
}

/// Prune every channel with a retention policy as of `now`. Returns the
/// number of messages removed. A channel that fails to prune is logged and
/// skipped; only a failed policy lookup fails the sweep.
pub async fn sweep_expired(services: &Services, now: i64) -> Result<usize> {
    let policies = services.retention_policies().await?;

    let mut removed = 0;
    for (name, retention_seconds) in policies {
        let channel = match ChannelName::parse(&name) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Retention: skipping channel {:?}: {}", name, e);
                continue;
            }
        };
        match services.store.prune_before(&channel, now - retention_seconds).await {
            Ok(count) => removed += count,
            Err(e) => warn!("Retention: pruning #{} failed: {}", channel, e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use textale_db::Database;
    use textale_types::Message;

    #[tokio::test]
    async fn sweep_honours_per_channel_policies() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("textale.db")).unwrap());
        db.upsert_channel("general", Some(60)).unwrap();
        db.upsert_channel("random", None).unwrap();
        let services = Services::new(db, 32);

        let general = ChannelName::parse("general").unwrap();
        let random = ChannelName::parse("random").unwrap();
        let unlisted = ChannelName::parse("lobby").unwrap();
        for channel in [&general, &random, &unlisted] {
            services.store.append(channel, Message::at("a", "old", 100)).await.unwrap();
            services.store.append(channel, Message::at("a", "fresh", 1_000)).await.unwrap();
        }

        let removed = sweep_expired(&services, 1_030).await.unwrap();
        assert_eq!(removed, 1);

        let history = services.store.recent_history(&general, 10).await.unwrap();
        assert_eq!(history, vec![Message::at("a", "fresh", 1_000)]);
        assert_eq!(services.store.recent_history(&random, 10).await.unwrap().len(), 2);
        assert_eq!(services.store.recent_history(&unlisted, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fresh_database_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("textale.db")).unwrap());
        let services = Services::new(db, 32);

        let now = chrono::Utc::now().timestamp();
        let general = ChannelName::parse("general").unwrap();
        services
            .store
            .append(&general, Message::at("alice", "ten minutes ago", now - 600))
            .await
            .unwrap();

        assert_eq!(sweep_expired(&services, now).await.unwrap(), 0);
        assert_eq!(services.store.recent_history(&general, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("textale.db")).unwrap());
        db.upsert_channel("general", Some(60)).unwrap();
        db.upsert_channel("random", Some(60)).unwrap();
        // Deletes from #general abort; "general" sorts before "random"
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER keep_general BEFORE DELETE ON channel_messages
                 WHEN OLD.history_key = 'channel:general:messages'
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let services = Services::new(db, 32);

        let general = ChannelName::parse("general").unwrap();
        let random = ChannelName::parse("random").unwrap();
        for channel in [&general, &random] {
            services.store.append(channel, Message::at("a", "old", 100)).await.unwrap();
        }

        assert_eq!(sweep_expired(&services, 1_000).await.unwrap(), 1);
        assert_eq!(services.store.recent_history(&general, 10).await.unwrap().len(), 1);
        assert!(services.store.recent_history(&random, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("textale.db")).unwrap());
        let services = Services::new(db, 32);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_retention_loop(
            services,
            Duration::from_secs(3600),
            shutdown.clone(),
        ));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
