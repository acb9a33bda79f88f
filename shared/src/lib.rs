pub mod bus;
pub mod contracts;
pub mod events;
pub mod retry;
pub mod topology;

pub use bus::{
    settle, shutdown_signal, BusClient, BusError, Disposition, EventPublisher, MemoryPublisher,
    PublishedMessage,
};
pub use events::{DecodeError, DomainEvent, Envelope, SagaStatus};
pub use retry::{RetryAction, RetryPolicy, MAX_ATTEMPTS};
