use std::sync::Arc;

use futures::StreamExt;
use lapin::Consumer;
use tracing::{debug, error, info, warn};

use shared::events::{InventoryRelease, ReserveRequest};
use shared::{DecodeError, Disposition, DomainEvent, Envelope, EventPublisher};

use crate::store::{InventoryStore, ReleaseOutcome, ReserveOutcome};

/// Consumes reservation commands and answers each with exactly one
/// outcome event.
pub struct EventProcessor {
    store: Arc<dyn InventoryStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn InventoryStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
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
        let event = match DomainEvent::from_envelope(&envelope) {
            Ok(event) => event,
            Err(DecodeError::UnknownType(event_type)) => {
                warn!("Ignoring unknown event type: {}", event_type);
                return Disposition::Ack;
            }
            Err(e) => {
                error!("Discarding malformed message {}: {}", envelope.id, e);
                return Disposition::Reject;
            }
        };

        match event {
            DomainEvent::ReserveRequest(request) => self.reserve(&envelope, &request).await,
            DomainEvent::InventoryRelease(release) => self.release(&envelope, &release).await,
            _ => {
                debug!("Nothing to do for {}", envelope.event_type);
                Disposition::Ack
            }
        }
    }

    async fn reserve(&self, envelope: &Envelope, request: &ReserveRequest) -> Disposition {
        if request.items.iter().any(|item| item.qty <= 0) {
            error!(
                "Discarding reservation for {} with a non-positive quantity",
                request.order_id
            );
            return Disposition::Reject;
        }

        match self.store.reserve(envelope, request).await {
            Ok(ReserveOutcome::Reserved {
                envelope: out,
                total_amount,
            }) => {
                info!(
                    "Reserved {} item(s) for order {} at {:.2}",
                    request.items.len(),
                    request.order_id,
                    total_amount
                );
                self.answer(&out).await
            }
            Ok(ReserveOutcome::Unavailable { envelope: out }) => {
                warn!("Could not reserve stock for order {}", request.order_id);
                self.answer(&out).await
            }
            Ok(ReserveOutcome::Duplicate) => {
                info!(
                    "Duplicate {} for {}; skipping",
                    envelope.event_type, envelope.idempotency_key
                );
                Disposition::Ack
            }
            Err(e) => {
                error!("Failed to reserve for order {}: {}", request.order_id, e);
                Disposition::Reject
            }
        }
    }

    async fn release(&self, envelope: &Envelope, release: &InventoryRelease) -> Disposition {
        match self.store.release(envelope).await {
            Ok(ReleaseOutcome::Released { count }) => {
                info!(
                    "Released {} reservation(s) for order {} ({})",
                    count, release.order_id, release.reason
                );
                Disposition::Ack
            }
            Ok(ReleaseOutcome::NothingToRelease) => {
                info!(
                    "Nothing reserved for order {}; nothing released",
                    release.order_id
                );
                Disposition::Ack
            }
            Ok(ReleaseOutcome::Duplicate) => {
                info!(
                    "Duplicate {} for {}; skipping",
                    envelope.event_type, envelope.idempotency_key
                );
                Disposition::Ack
            }
            Err(e) => {
                error!("Failed to release for order {}: {}", release.order_id, e);
                Disposition::Reject
            }
        }
    }

    /// The mutation commits with the ledger row before this publish; a
    /// redelivery after a failed publish comes back as a duplicate. Reject
    /// to the dead queue so the stalled order stays visible.
    async fn answer(&self, out: &Envelope) -> Disposition {
        match self.publisher.publish(out).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                error!("Error publishing {}: {}", out.event_type, e);
                Disposition::Reject
            }
        }
    }
}
