use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::OptionalExtension;

use super::Store;
use crate::config::ReadConsistency;

/// Persisted activity record of one Telegram user
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub struct UserRecord {
    pub user_id: i64,
    pub last_seen: i64,
    pub interaction_days: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Fields applied by one accepted tracker write.
///
/// `None` profile fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUpdate {
    pub last_seen: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Storage contract used by the user tracker.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: i64, consistency: ReadConsistency) -> Result<Option<UserRecord>>;

    /// Single atomic merge: sets `last_seen`, bumps `interaction_days` by one
    /// (starting from zero) and overwrites only the profile fields present.
    async fn conditional_update(&self, user_id: i64, update: &UserUpdate) -> Result<()>;
}

#[async_trait]
impl UserStore for Store {
    // One SQLite connection serves every read, so both consistency levels
    // observe the latest committed write.
    async fn get(&self, user_id: i64, _consistency: ReadConsistency) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT user_id, last_seen, interaction_days, username, first_name
             FROM users WHERE user_id = ?1",
            rusqlite::params![user_id],
            parse_user_row,
        )
        .optional()
        .with_context(|| format!("Failed to read user {}", user_id))
    }

    async fn conditional_update(&self, user_id: i64, update: &UserUpdate) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (user_id, last_seen, interaction_days, username, first_name)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                last_seen = excluded.last_seen,
                interaction_days = coalesce(users.interaction_days, 0) + 1,
                username = coalesce(excluded.username, users.username),
                first_name = coalesce(excluded.first_name, users.first_name)",
            rusqlite::params![
                user_id,
                update.last_seen,
                update.username,
                update.first_name
            ],
        )
        .with_context(|| format!("Failed to update user {}", user_id))?;
        Ok(())
    }
}

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.get(0)?,
        last_seen: row.get(1)?,
        interaction_days: row.get(2)?,
        username: row.get(3)?,
        first_name: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(last_seen: i64, username: Option<&str>, first_name: Option<&str>) -> UserUpdate {
        UserUpdate {
            last_seen,
            username: username.map(str::to_string),
            first_name: first_name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .get(1, ReadConsistency::Eventual)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_first_write_starts_at_one() {
        let store = Store::open_in_memory().unwrap();
        store
            .conditional_update(42, &update(1000, Some("a"), Some("A")))
            .await
            .unwrap();

        let record = store.get(42, ReadConsistency::Strong).await.unwrap().unwrap();
        assert_eq!(
            record,
            UserRecord {
                user_id: 42,
                last_seen: 1000,
                interaction_days: 1,
                username: Some("a".to_string()),
                first_name: Some("A".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_absent_fields_keep_stored_values() {
        let store = Store::open_in_memory().unwrap();
        store
            .conditional_update(7, &update(100, Some("old"), Some("Old")))
            .await
            .unwrap();
        store
            .conditional_update(7, &update(200, None, Some("New")))
            .await
            .unwrap();

        let record = store.get(7, ReadConsistency::Eventual).await.unwrap().unwrap();
        assert_eq!(record.last_seen, 200);
        assert_eq!(record.interaction_days, 2);
        assert_eq!(record.username.as_deref(), Some("old"));
        assert_eq!(record.first_name.as_deref(), Some("New"));
    }
}
