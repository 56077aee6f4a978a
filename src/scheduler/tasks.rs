use anyhow::Result;
use tracing::{info, warn};

use crate::scheduler::Scheduler;
use crate::store::Store;

/// Hourly heartbeat with queue depth, and a per-minute sweep that hands
/// expired claims back to the worker.
pub async fn register_builtin_tasks(scheduler: &Scheduler, store: Store) -> Result<()> {
    let heartbeat_store = store.clone();
    scheduler
        .add_cron_job("0 0 * * * *", "heartbeat", move || {
            let store = heartbeat_store.clone();
            Box::pin(async move { heartbeat(&store).await })
        })
        .await?;

    scheduler
        .add_cron_job("0 * * * * *", "release-expired-claims", move || {
            let store = store.clone();
            Box::pin(async move {
                release_expired_claims(&store, chrono::Utc::now().timestamp()).await;
            })
        })
        .await?;

    Ok(())
}

async fn heartbeat(store: &Store) {
    match store.queue_depth().await {
        Ok(depth) => info!("Heartbeat: relay is alive, {} update(s) queued", depth),
        Err(e) => warn!("Heartbeat: failed to read queue depth: {:#}", e),
    }
}

/// Returns how many claims were released; store errors count as none.
async fn release_expired_claims(store: &Store, now: i64) -> usize {
    match store.release_expired(now).await {
        Ok(0) => 0,
        Ok(n) => {
            warn!("Released {} expired claim(s) for redelivery", n);
            n
        }
        Err(e) => {
            warn!("Failed to release expired claims: {:#}", e);
            0
        }
    }
}
