use std::sync::Arc;

use futures::StreamExt;
use lapin::Consumer;
use tracing::{debug, error, info, warn};

use shared::{DecodeError, Disposition, DomainEvent, Envelope, EventPublisher};

use crate::outbox;
use crate::store::{Outcome, SagaStore};

/// Consumes saga events, applies them through the store and drains the
/// resulting outbox rows straight away.
pub struct EventProcessor {
    store: Arc<dyn SagaStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn SagaStore>, publisher: Arc<dyn EventPublisher>) -> Self {
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

    /// Decides the fate of one delivery. Acking is the norm: only payloads
    /// we will never be able to process, or transient store failures, are
    /// handed to the broker's dead-letter routing.
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

        match self.store.process(&envelope, &event).await {
            Ok(Outcome::Applied { status, pending }) => {
                info!(
                    "Saga {} advanced to {} on {}",
                    envelope.idempotency_key, status, envelope.event_type
                );
                self.drain(&pending).await;
                Disposition::Ack
            }
            Ok(Outcome::Duplicate { pending }) => {
                info!(
                    "Duplicate {} for saga {}; skipping",
                    envelope.event_type, envelope.idempotency_key
                );
                // Redelivery after a publish failure: finish the drain now.
                self.drain(&pending).await;
                Disposition::Ack
            }
            Ok(Outcome::UnknownSaga) => {
                warn!(
                    "No saga {} for {}; ignoring",
                    envelope.idempotency_key, envelope.event_type
                );
                Disposition::Ack
            }
            Ok(Outcome::OutOfOrder { status }) => {
                warn!(
                    "{} out of order for saga {} in status {}; ignoring",
                    envelope.event_type, envelope.idempotency_key, status
                );
                Disposition::Ack
            }
            Ok(Outcome::Unhandled) => {
                debug!("Nothing to do for {}", envelope.event_type);
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    "Failed to process {} for saga {}: {}",
                    envelope.event_type, envelope.idempotency_key, e
                );
                Disposition::Reject
            }
        }
    }

    /// Best effort: the transition is already committed, so a failed
    /// publish only delays the events until redelivery or the sweeper.
    async fn drain(&self, pending: &[crate::models::PendingEvent]) {
        outbox::drain(self.store.as_ref(), self.publisher.as_ref(), pending).await;
    }
}
