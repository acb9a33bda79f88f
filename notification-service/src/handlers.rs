use std::sync::Arc;

use futures::StreamExt;
use lapin::types::FieldTable;
use lapin::Consumer;
use tracing::{debug, error, info};

use shared::{DecodeError, Disposition, DomainEvent, Envelope, EventPublisher, RetryPolicy};

use crate::notifier::Notifier;

/// Consumes `notify.request` deliveries. Any failure, whether the payload
/// is undecodable or the channel is down, goes through the bounded retry
/// pipeline; nothing is requeued in place.
pub struct EventProcessor {
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl EventProcessor {
    pub fn new(notifier: Arc<dyn Notifier>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            notifier,
            publisher,
            retry: RetryPolicy::new(crate::SERVICE),
        }
    }

    pub async fn run(&self, mut consumer: Consumer) {
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    let disposition = self
                        .process_delivery(&delivery.data, delivery.properties.headers().as_ref())
                        .await;
                    if let Err(e) = shared::settle(&delivery, disposition).await {
                        error!("Error settling delivery: {}", e);
                    }
                }
                Err(e) => error!("Error receiving delivery: {}", e),
            }
        }
    }

    pub async fn process_delivery(
        &self,
        payload: &[u8],
        headers: Option<&FieldTable>,
    ) -> Disposition {
        match self.try_notify(payload).await {
            Ok(()) => Disposition::Ack,
            Err(e) => self.reroute(payload, headers, &e).await,
        }
    }

    async fn try_notify(&self, payload: &[u8]) -> anyhow::Result<()> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        match DomainEvent::from_envelope(&envelope) {
            Ok(DomainEvent::NotifyRequest(request)) => {
                self.notifier.notify(&request).await?;
                info!(
                    "Notification for order {} delivered to {}",
                    request.order_id, request.customer_id
                );
                Ok(())
            }
            Ok(_) | Err(DecodeError::UnknownType(_)) => {
                debug!("Nothing to send for {}", envelope.event_type);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The failed delivery is acked only once its copy is confirmed on the
    /// retry or dead route; until then it stays with the broker.
    async fn reroute(
        &self,
        payload: &[u8],
        headers: Option<&FieldTable>,
        error: &anyhow::Error,
    ) -> Disposition {
        match self
            .retry
            .on_failure(
                self.publisher.as_ref(),
                headers,
                payload,
                &error.to_string(),
            )
            .await
        {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                error!("Error rerouting failed delivery: {}", e);
                Disposition::Requeue
            }
        }
    }
}
