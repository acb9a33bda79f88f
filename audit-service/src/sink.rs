use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use lapin::Consumer;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use shared::{Disposition, Envelope};

/// Appends every event on the bus as one line of JSON, whatever its type.
/// Dedup is by delivery id in a process-local set: coarse and best-effort,
/// not part of the business idempotency guarantee.
pub struct AuditLog {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub async fn run(&self, mut consumer: Consumer) {
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    let disposition = self.process_delivery(&delivery.data).await;
                    if let Err(e) = shared::settle(&delivery, disposition).await {
                        error!("Error settling delivery: {}", e);
                    }
                }
                Err(e) => error!("Error receiving delivery: {}", e),
            }
        }
    }

    pub async fn process_delivery(&self, payload: &[u8]) -> Disposition {
        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Discarding undecodable message: {}", e);
                return Disposition::Reject;
            }
        };

        if self.seen.lock().await.contains(&envelope.id) {
            debug!("Already logged {}", envelope.id);
            return Disposition::Ack;
        }

        match self.append(&envelope).await {
            Ok(()) => {
                self.seen.lock().await.insert(envelope.id.clone());
                debug!("Logged {} {}", envelope.event_type, envelope.id);
                Disposition::Ack
            }
            Err(e) => {
                // File trouble should pass; take the delivery again later.
                error!("Error appending {}: {}", envelope.id, e);
                Disposition::Requeue
            }
        }
    }

    async fn append(&self, envelope: &Envelope) -> Result<()> {
        let entry = json!({
            "timestamp": Utc::now(),
            "eventId": envelope.id,
            "eventType": envelope.event_type,
            "idempotencyKey": envelope.idempotency_key,
            "data": envelope.data,
            "originalTimestamp": envelope.occurred_at,
        });
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
