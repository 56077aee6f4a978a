//! Debounced user activity tracking.
//!
//! A sender's record is written at most once per debounce window. The read
//! and the write are not a compare-and-swap: two overlapping calls inside an
//! empty window may both write, which only costs an extra increment.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{ReadConsistency, TrackingConfig};
use crate::store::users::{UserStore, UserUpdate};

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("Invalid user id: {0}. Must be a positive integer.")]
    InvalidIdentity(i64),

    #[error("User store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("User store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Written,
    /// Last write is younger than the debounce window.
    Skipped,
}

pub struct UserTracker {
    store: Arc<dyn UserStore>,
    window_secs: i64,
    consistency: ReadConsistency,
    io_timeout: Duration,
}

impl UserTracker {
    pub fn new(store: Arc<dyn UserStore>, config: &TrackingConfig, io_timeout: Duration) -> Self {
        Self {
            store,
            window_secs: config.debounce_window_secs,
            consistency: config.read_consistency,
            io_timeout,
        }
    }

    pub async fn upsert(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<TrackOutcome, TrackError> {
        self.upsert_at(chrono::Utc::now().timestamp(), user_id, username, first_name)
            .await
    }

    pub async fn upsert_at(
        &self,
        now: i64,
        user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<TrackOutcome, TrackError> {
        if user_id <= 0 {
            return Err(TrackError::InvalidIdentity(user_id));
        }

        let existing = tokio::time::timeout(self.io_timeout, self.store.get(user_id, self.consistency))
            .await
            .map_err(|_| TrackError::Timeout(self.io_timeout))??;

        if let Some(record) = existing {
            let elapsed = now - record.last_seen;
            if elapsed < self.window_secs {
                debug!("User {} update skipped (debounce: {}s ago)", user_id, elapsed);
                return Ok(TrackOutcome::Skipped);
            }
        }

        let update = UserUpdate {
            last_seen: now,
            username: username.map(str::to_string),
            first_name: first_name.map(str::to_string),
        };
        tokio::time::timeout(
            self.io_timeout,
            self.store.conditional_update(user_id, &update),
        )
        .await
        .map_err(|_| TrackError::Timeout(self.io_timeout))??;

        info!("Registered/updated user {} (active days +1)", user_id);
        Ok(TrackOutcome::Written)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{BrokenStore, CountingStore, HangingStore};
    use super::*;

    const T: i64 = 1_700_000_000;

    fn tracker(store: Arc<dyn UserStore>) -> UserTracker {
        UserTracker::new(store, &TrackingConfig::default(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_new_user_written_with_one_day() {
        let store = Arc::new(CountingStore::new());
        let tracker = tracker(store.clone());

        let outcome = tracker.upsert_at(T, 42, Some("a"), Some("A")).await.unwrap();
        assert_eq!(outcome, TrackOutcome::Written);

        let record = store.get(42, ReadConsistency::Strong).await.unwrap().unwrap();
        assert_eq!(record.interaction_days, 1);
        assert_eq!(record.last_seen, T);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_debounce_boundary() {
        let store = Arc::new(CountingStore::new());
        let tracker = tracker(store.clone());
        tracker.upsert_at(T, 9, None, None).await.unwrap();

        let inside = tracker.upsert_at(T + 86_399, 9, None, None).await.unwrap();
        assert_eq!(inside, TrackOutcome::Skipped);
        assert_eq!(store.write_count(), 1);

        let boundary = tracker.upsert_at(T + 86_400, 9, None, None).await.unwrap();
        assert_eq!(boundary, TrackOutcome::Written);
        assert_eq!(store.write_count(), 2);

        let record = store.get(9, ReadConsistency::Eventual).await.unwrap().unwrap();
        assert_eq!(record.interaction_days, 2);
        assert_eq!(record.last_seen, T + 86_400);
    }

    #[tokio::test]
    async fn test_skipped_call_keeps_profile() {
        let store = Arc::new(CountingStore::new());
        let tracker = tracker(store.clone());
        tracker.upsert_at(T, 5, Some("before"), None).await.unwrap();
        tracker.upsert_at(T + 10, 5, Some("after"), None).await.unwrap();

        let record = store.get(5, ReadConsistency::Eventual).await.unwrap().unwrap();
        assert_eq!(record.username.as_deref(), Some("before"));
        assert_eq!(record.interaction_days, 1);
    }

    #[tokio::test]
    async fn test_invalid_identity() {
        let store = Arc::new(CountingStore::new());
        let tracker = tracker(store.clone());

        for id in [0, -3] {
            let err = tracker.upsert_at(T, id, None, None).await.unwrap_err();
            assert!(matches!(err, TrackError::InvalidIdentity(i) if i == id));
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_typed() {
        let tracker = tracker(Arc::new(BrokenStore));
        let err = tracker.upsert_at(T, 1, None, None).await.unwrap_err();
        assert!(matches!(err, TrackError::Store(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let tracker = UserTracker::new(
            Arc::new(HangingStore),
            &TrackingConfig::default(),
            Duration::from_millis(50),
        );
        let err = tracker.upsert_at(T, 1, None, None).await.unwrap_err();
        assert!(matches!(err, TrackError::Timeout(d) if d == Duration::from_millis(50)));
    }
}
