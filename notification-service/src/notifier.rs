use async_trait::async_trait;
use tracing::info;

use shared::events::NotifyRequest;

/// Delivery channel for order confirmations. The bus side of the service
/// (retries, dead-lettering) is the same whatever the channel is.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &NotifyRequest) -> anyhow::Result<()>;
}

/// Writes confirmations to the log, standing in for a real channel such
/// as SMTP.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, request: &NotifyRequest) -> anyhow::Result<()> {
        info!(
            "Order confirmation for {} sent to customer {}",
            request.order_id, request.customer_id
        );
        Ok(())
    }
}
