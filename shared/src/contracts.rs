//! Names shared by every service on the bus: exchanges, queues, routing keys.

/// Topic exchange all domain events flow through.
pub const EVENTS_EXCHANGE: &str = "order.events";

/// Direct exchange for the retry / dead-letter pipeline.
pub const DEAD_LETTER_EXCHANGE: &str = "order.dlx";

pub mod routing_key {
    pub const ORDER_CREATED: &str = "order.created";

    pub const RESERVE_REQUEST: &str = "reserve.request";
    pub const RESERVE_SUCCEEDED: &str = "reserve.succeeded";
    pub const RESERVE_FAILED: &str = "reserve.failed";
    pub const INVENTORY_RELEASE: &str = "inventory.release";

    pub const PAYMENT_REQUEST: &str = "payment.request";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";

    pub const NOTIFY_REQUEST: &str = "notify.request";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_FAILED: &str = "saga.failed";
}

pub mod queue {
    pub const ORCHESTRATOR: &str = "orchestrator.q";
    pub const INVENTORY: &str = "inventory.q";
    pub const NOTIFY: &str = "notify.q";
    pub const AUDIT: &str = "audit.q";
}

/// Routing key on the dead-letter exchange that feeds a service's delay queue.
pub fn retry_key(service: &str) -> String {
    format!("{}.retry", service)
}

/// Routing key on the dead-letter exchange that feeds a service's terminal queue.
pub fn dead_key(service: &str) -> String {
    format!("{}.dead", service)
}

/// Delay queue name for a service (`notify.retry.q`).
pub fn retry_queue(service: &str) -> String {
    format!("{}.retry.q", service)
}

/// Terminal quarantine queue name for a service (`notify.dlq`).
pub fn dead_queue(service: &str) -> String {
    format!("{}.dlq", service)
}

/// Header carrying the number of processing attempts already made.
pub const ATTEMPTS_HEADER: &str = "x-attempts";

/// Header recording the last error before a message is quarantined.
pub const FINAL_ERROR_HEADER: &str = "x-final-error";
