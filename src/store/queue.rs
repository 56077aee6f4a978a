use anyhow::{Context, Result};
use uuid::Uuid;

use super::Store;

/// One queued webhook body handed to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: String,
    pub body: Vec<u8>,
    pub receive_count: i64,
}

impl Store {
    /// Append a raw update body; returns its delivery id.
    pub async fn enqueue(&self, body: &[u8], now: i64) -> Result<String> {
        let delivery_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO update_queue (delivery_id, body, enqueued_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![&delivery_id, body, now],
        )
        .context("Failed to enqueue update")?;
        Ok(delivery_id)
    }

    /// Claim up to `max` unclaimed deliveries in arrival order.
    ///
    /// Claimed deliveries stay hidden until deleted or until their claim
    /// expires and [`Store::release_expired`] makes them visible again.
    pub async fn receive_batch(
        &self,
        max: usize,
        now: i64,
        visibility_timeout_secs: i64,
    ) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("Failed to begin receive")?;

        let batch = {
            let mut stmt = tx.prepare(
                "SELECT delivery_id, body, receive_count + 1
                 FROM update_queue
                 WHERE claimed_until IS NULL
                 ORDER BY seq
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![max as i64], |row| {
                    Ok(Delivery {
                        delivery_id: row.get(0)?,
                        body: row.get(1)?,
                        receive_count: row.get(2)?,
                    })
                })
                .context("Failed to map deliveries")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to collect deliveries")?;
            rows
        };

        for delivery in &batch {
            tx.execute(
                "UPDATE update_queue
                 SET claimed_until = ?1, receive_count = receive_count + 1
                 WHERE delivery_id = ?2",
                rusqlite::params![now + visibility_timeout_secs, &delivery.delivery_id],
            )?;
        }

        tx.commit().context("Failed to commit receive")?;
        Ok(batch)
    }

    /// Remove finished deliveries.
    pub async fn delete_deliveries(&self, delivery_ids: &[String]) -> Result<usize> {
        let conn = self.conn.lock().await;
        let mut removed = 0;
        for id in delivery_ids {
            removed += conn
                .execute(
                    "DELETE FROM update_queue WHERE delivery_id = ?1",
                    rusqlite::params![id],
                )
                .context("Failed to delete delivery")?;
        }
        Ok(removed)
    }

    /// Make deliveries whose claim has expired visible again.
    pub async fn release_expired(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let released = conn
            .execute(
                "UPDATE update_queue SET claimed_until = NULL
                 WHERE claimed_until IS NOT NULL AND claimed_until <= ?1",
                rusqlite::params![now],
            )
            .context("Failed to release expired claims")?;
        Ok(released)
    }

    pub async fn queue_depth(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT count(*) FROM update_queue", [], |row| row.get(0))
            .context("Failed to count queue")
    }
}
