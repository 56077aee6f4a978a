use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::context::RawEvent;
use crate::dispatcher::DispatchEngine;
use crate::store::queue::Delivery;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Processed,
    /// Body could not be decoded; the record is dropped.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Feeds each delivered record to the dispatcher, one at a time.
pub struct BatchProcessor {
    engine: Arc<DispatchEngine>,
}

impl BatchProcessor {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }

    /// Process a whole batch. Per-record failures never stop the loop, so a
    /// single bad body cannot make the queue redeliver the entire batch.
    pub async fn run(&self, batch: &[Delivery]) -> BatchSummary {
        info!("Received batch of {} record(s)", batch.len());

        let mut summary = BatchSummary::default();
        for delivery in batch {
            match self.process(delivery).await {
                RecordOutcome::Processed => summary.processed += 1,
                RecordOutcome::Skipped => summary.skipped += 1,
            }
        }

        info!(
            "Batch processing completed: {} processed, {} skipped",
            summary.processed, summary.skipped
        );
        summary
    }

    async fn process(&self, delivery: &Delivery) -> RecordOutcome {
        let event = match RawEvent::from_slice(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    "Failed to decode record {} (attempt {}): {}",
                    delivery.delivery_id, delivery.receive_count, e
                );
                return RecordOutcome::Skipped;
            }
        };

        let outcome = self.engine.dispatch(&event).await;
        debug!(
            "Record {} (update {:?}) dispatched: {:?}",
            delivery.delivery_id, event.update_id, outcome
        );
        RecordOutcome::Processed
    }
}

/// Poll the queue until `shutdown` flips to true.
///
/// Each received batch is deleted once processed, whatever the per-record
/// outcome; only a crash mid-batch leaves claims to expire and be redelivered.
pub async fn run(
    store: Store,
    processor: BatchProcessor,
    config: QueueConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Worker started (batch size {}, poll every {:?})",
        config.batch_size,
        config.poll_interval()
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let now = chrono::Utc::now().timestamp();
        let batch = match store
            .receive_batch(config.batch_size, now, config.visibility_timeout_secs)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to receive from queue: {:#}", e);
                Vec::new()
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval()) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        processor.run(&batch).await;

        let ids: Vec<String> = batch.into_iter().map(|d| d.delivery_id).collect();
        if let Err(e) = store.delete_deliveries(&ids).await {
            warn!("Failed to delete processed batch: {:#}", e);
        }
    }

    info!("Worker stopped");
}
