//! Outbox drain.
//!
//! Committed outbox rows are normally published right after the commit, in
//! the consumer that produced them. The sweeper exists for the crash
//! window: rows whose publish never happened are picked up on an interval
//! and pushed out in insertion order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lapin::types::FieldTable;
use tokio::time;
use tracing::{error, info, warn};

use shared::contracts::EVENTS_EXCHANGE;
use shared::EventPublisher;

use crate::models::PendingEvent;
use crate::store::SagaStore;

const SWEEP_BATCH: i64 = 100;

/// Publishes one outbox row, routed by its stored event type.
pub async fn publish_pending(publisher: &dyn EventPublisher, row: &PendingEvent) -> Result<()> {
    let payload = serde_json::to_vec(&row.payload)?;
    publisher
        .publish_raw(EVENTS_EXCHANGE, &row.event_type, &payload, FieldTable::default())
        .await?;
    Ok(())
}

/// Publishes rows in order, marking each as it lands. Stops at the first
/// failure so a later row never overtakes an earlier one.
pub async fn drain(
    store: &dyn SagaStore,
    publisher: &dyn EventPublisher,
    rows: &[PendingEvent],
) -> usize {
    let mut published = 0;
    for row in rows {
        if let Err(e) = publish_pending(publisher, row).await {
            warn!(
                "Outbox publish failed for event {} ({}); leaving for next sweep: {}",
                row.id, row.event_type, e
            );
            break;
        }
        if let Err(e) = store.mark_published(row).await {
            error!("Failed to mark outbox event {} as published: {}", row.id, e);
            break;
        }
        published += 1;
    }
    published
}

pub struct OutboxSweeper {
    store: Arc<dyn SagaStore>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
}

impl OutboxSweeper {
    pub fn new(
        store: Arc<dyn SagaStore>,
        publisher: Arc<dyn EventPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                error!("Outbox sweep failed: {}", e);
            }
        }
    }

    pub async fn sweep(&self) -> Result<usize> {
        let rows = self.store.unpublished(SWEEP_BATCH).await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let published = drain(self.store.as_ref(), self.publisher.as_ref(), &rows).await;
        info!("Swept {}/{} unpublished outbox events", published, rows.len());
        Ok(published)
    }
}
