//! Pure saga transition logic.
//!
//! [`decide`] maps the current saga row and an incoming event to a decision
//! without touching the database or the broker, so the whole transition
//! table is testable in isolation. The store applies the decision
//! transactionally; the failure of a compensating saga is finalized later,
//! when its `saga.failed` event actually leaves the outbox.

use uuid::Uuid;

use shared::events::{
    InventoryRelease, NotifyRequest, PaymentRequest, ReserveRequest, SagaCompleted, SagaFailed,
};
use shared::{DomainEvent, Envelope, SagaStatus};

use crate::models::Saga;

pub mod step {
    pub const RESERVE_INVENTORY: &str = "reserve_inventory";
    pub const PROCESS_PAYMENT: &str = "process_payment";
    pub const COMPENSATE_INVENTORY: &str = "compensate_inventory";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug)]
pub enum Decision {
    /// First sight of an order: create the saga and kick off reservation.
    Start { saga: Saga, emit: Vec<DomainEvent> },
    /// A step outcome arrived in the expected state; move the saga along.
    Advance {
        status: SagaStatus,
        step: &'static str,
        emit: Vec<DomainEvent>,
    },
    /// Step outcome for a saga that was never started here.
    UnknownSaga,
    /// Event does not apply to the saga's current state.
    OutOfOrder { status: SagaStatus },
    /// Event type the orchestrator does not act on.
    Unhandled,
}

pub fn decide(saga: Option<&Saga>, envelope: &Envelope, event: &DomainEvent) -> Decision {
    match event {
        DomainEvent::OrderCreated(data) => match saga {
            Some(existing) => Decision::OutOfOrder {
                status: existing.status(),
            },
            None => Decision::Start {
                saga: Saga {
                    saga_id: Uuid::new_v4(),
                    idempotency_key: envelope.idempotency_key.clone(),
                    order_id: data.order_id.clone(),
                    customer_id: data.customer_id.clone(),
                    status: SagaStatus::Started.to_string(),
                    current_step: step::RESERVE_INVENTORY.to_string(),
                    order_data: envelope.data.clone(),
                    created_at: None,
                    updated_at: None,
                },
                emit: vec![DomainEvent::ReserveRequest(ReserveRequest {
                    order_id: data.order_id.clone(),
                    items: data.items.clone(),
                })],
            },
        },
        DomainEvent::ReserveSucceeded(data) => match saga {
            None => Decision::UnknownSaga,
            Some(s) => match s.status() {
                SagaStatus::Started => Decision::Advance {
                    status: SagaStatus::InventoryReserved,
                    step: step::PROCESS_PAYMENT,
                    emit: vec![DomainEvent::PaymentRequest(PaymentRequest {
                        order_id: data.order_id.clone(),
                        amount: data.total_amount,
                    })],
                },
                status => Decision::OutOfOrder { status },
            },
        },
        DomainEvent::ReserveFailed(data) => match saga {
            None => Decision::UnknownSaga,
            Some(s) => match s.status() {
                // Nothing was reserved, so there is nothing to compensate.
                SagaStatus::Started => Decision::Advance {
                    status: SagaStatus::Failed,
                    step: step::FAILED,
                    emit: vec![DomainEvent::SagaFailed(SagaFailed {
                        order_id: data.order_id.clone(),
                        reason: "inventory_unavailable".to_string(),
                        unavailable_items: Some(data.unavailable_items.clone()),
                    })],
                },
                status => Decision::OutOfOrder { status },
            },
        },
        DomainEvent::PaymentSucceeded(data) => match saga {
            None => Decision::UnknownSaga,
            Some(s) => match s.status() {
                SagaStatus::InventoryReserved => Decision::Advance {
                    status: SagaStatus::Completed,
                    step: step::COMPLETED,
                    emit: vec![
                        DomainEvent::SagaCompleted(SagaCompleted {
                            order_id: data.order_id.clone(),
                        }),
                        DomainEvent::NotifyRequest(NotifyRequest {
                            order_id: data.order_id.clone(),
                            customer_id: s.customer_id.clone(),
                        }),
                    ],
                },
                status => Decision::OutOfOrder { status },
            },
        },
        DomainEvent::PaymentFailed(data) => match saga {
            None => Decision::UnknownSaga,
            Some(s) => match s.status() {
                // Release before announcing failure; outbox order is
                // preserved all the way to the broker.
                SagaStatus::InventoryReserved => Decision::Advance {
                    status: SagaStatus::Compensating,
                    step: step::COMPENSATE_INVENTORY,
                    emit: vec![
                        DomainEvent::InventoryRelease(InventoryRelease {
                            order_id: data.order_id.clone(),
                            reason: "payment_failed".to_string(),
                        }),
                        DomainEvent::SagaFailed(SagaFailed {
                            order_id: data.order_id.clone(),
                            reason: "payment_failed".to_string(),
                            unavailable_items: None,
                        }),
                    ],
                },
                status => Decision::OutOfOrder { status },
            },
        },
        _ => Decision::Unhandled,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::events::{
        OrderCreated, OrderItem, PaymentFailed, PaymentSucceeded, ReserveFailed, ReserveSucceeded,
        UnavailableItem,
    };

    use super::*;

    fn order_created() -> DomainEvent {
        DomainEvent::OrderCreated(OrderCreated {
            order_id: "ord_1".to_string(),
            customer_id: "cust-1".to_string(),
            items: vec![OrderItem {
                sku: "SKU-1".to_string(),
                qty: 2,
            }],
            note: None,
        })
    }

    fn saga_in(status: SagaStatus) -> Saga {
        Saga {
            saga_id: Uuid::new_v4(),
            idempotency_key: "ord_1".to_string(),
            order_id: "ord_1".to_string(),
            customer_id: "cust-1".to_string(),
            status: status.to_string(),
            current_step: step::RESERVE_INVENTORY.to_string(),
            order_data: json!({}),
            created_at: None,
            updated_at: None,
        }
    }

    fn envelope(event: &DomainEvent) -> Envelope {
        Envelope::new(event, "ord_1")
    }

    #[test]
    fn order_created_starts_saga_and_requests_reservation() {
        let event = order_created();
        match decide(None, &envelope(&event), &event) {
            Decision::Start { saga, emit } => {
                assert_eq!(saga.idempotency_key, "ord_1");
                assert_eq!(saga.customer_id, "cust-1");
                assert_eq!(saga.status, "started");
                assert_eq!(saga.current_step, step::RESERVE_INVENTORY);
                assert_eq!(emit.len(), 1);
                match &emit[0] {
                    DomainEvent::ReserveRequest(r) => {
                        assert_eq!(r.order_id, "ord_1");
                        assert_eq!(r.items.len(), 1);
                    }
                    other => panic!("unexpected emission: {:?}", other),
                }
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn repeated_order_created_does_not_restart_the_saga() {
        let event = order_created();
        let existing = saga_in(SagaStatus::Started);
        assert!(matches!(
            decide(Some(&existing), &envelope(&event), &event),
            Decision::OutOfOrder {
                status: SagaStatus::Started
            }
        ));
    }

    #[test]
    fn reserve_succeeded_moves_on_to_payment() {
        let event = DomainEvent::ReserveSucceeded(ReserveSucceeded {
            order_id: "ord_1".to_string(),
            reserved_items: vec![OrderItem {
                sku: "SKU-1".to_string(),
                qty: 2,
            }],
            total_amount: 59.98,
        });
        let saga = saga_in(SagaStatus::Started);
        match decide(Some(&saga), &envelope(&event), &event) {
            Decision::Advance { status, step, emit } => {
                assert_eq!(status, SagaStatus::InventoryReserved);
                assert_eq!(step, self::step::PROCESS_PAYMENT);
                match &emit[..] {
                    [DomainEvent::PaymentRequest(p)] => {
                        assert_eq!(p.order_id, "ord_1");
                        assert!((p.amount - 59.98).abs() < 1e-9);
                    }
                    other => panic!("unexpected emissions: {:?}", other),
                }
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn reserve_failure_fails_the_saga_without_compensation() {
        let event = DomainEvent::ReserveFailed(ReserveFailed {
            order_id: "ord_1".to_string(),
            unavailable_items: vec![UnavailableItem::insufficient("SKU-2", 50, 1000)],
        });
        let saga = saga_in(SagaStatus::Started);
        match decide(Some(&saga), &envelope(&event), &event) {
            Decision::Advance { status, step, emit } => {
                assert_eq!(status, SagaStatus::Failed);
                assert_eq!(step, self::step::FAILED);
                match &emit[..] {
                    [DomainEvent::SagaFailed(f)] => {
                        assert_eq!(f.reason, "inventory_unavailable");
                        let items = f.unavailable_items.as_ref().unwrap();
                        assert_eq!(items[0].sku, "SKU-2");
                        assert_eq!(items[0].available_stock, Some(50));
                    }
                    other => panic!("unexpected emissions: {:?}", other),
                }
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn payment_success_completes_and_notifies() {
        let event = DomainEvent::PaymentSucceeded(PaymentSucceeded {
            order_id: "ord_1".to_string(),
        });
        let saga = saga_in(SagaStatus::InventoryReserved);
        match decide(Some(&saga), &envelope(&event), &event) {
            Decision::Advance { status, step, emit } => {
                assert_eq!(status, SagaStatus::Completed);
                assert_eq!(step, self::step::COMPLETED);
                match &emit[..] {
                    [DomainEvent::SagaCompleted(c), DomainEvent::NotifyRequest(n)] => {
                        assert_eq!(c.order_id, "ord_1");
                        assert_eq!(n.customer_id, "cust-1");
                    }
                    other => panic!("unexpected emissions: {:?}", other),
                }
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn payment_failure_releases_stock_then_reports_failure() {
        let event = DomainEvent::PaymentFailed(PaymentFailed {
            order_id: "ord_1".to_string(),
            reason: Some("card_declined".to_string()),
        });
        let saga = saga_in(SagaStatus::InventoryReserved);
        match decide(Some(&saga), &envelope(&event), &event) {
            Decision::Advance { status, step, emit } => {
                assert_eq!(status, SagaStatus::Compensating);
                assert_eq!(step, self::step::COMPENSATE_INVENTORY);
                match &emit[..] {
                    [DomainEvent::InventoryRelease(r), DomainEvent::SagaFailed(f)] => {
                        assert_eq!(r.reason, "payment_failed");
                        assert_eq!(f.reason, "payment_failed");
                        assert!(f.unavailable_items.is_none());
                    }
                    other => panic!("unexpected emissions: {:?}", other),
                }
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn step_outcomes_without_a_saga_are_unknown() {
        let event = DomainEvent::PaymentSucceeded(PaymentSucceeded {
            order_id: "ord_1".to_string(),
        });
        assert!(matches!(
            decide(None, &envelope(&event), &event),
            Decision::UnknownSaga
        ));
    }

    #[test]
    fn late_outcomes_are_out_of_order() {
        let event = DomainEvent::ReserveSucceeded(ReserveSucceeded {
            order_id: "ord_1".to_string(),
            reserved_items: vec![],
            total_amount: 0.0,
        });
        let saga = saga_in(SagaStatus::Completed);
        assert!(matches!(
            decide(Some(&saga), &envelope(&event), &event),
            Decision::OutOfOrder {
                status: SagaStatus::Completed
            }
        ));

        // Payment outcomes cannot land before the reservation does.
        let event = DomainEvent::PaymentSucceeded(PaymentSucceeded {
            order_id: "ord_1".to_string(),
        });
        let saga = saga_in(SagaStatus::Started);
        assert!(matches!(
            decide(Some(&saga), &envelope(&event), &event),
            Decision::OutOfOrder {
                status: SagaStatus::Started
            }
        ));
    }

    #[test]
    fn events_outside_the_transition_table_are_unhandled() {
        let event = DomainEvent::SagaCompleted(SagaCompleted {
            order_id: "ord_1".to_string(),
        });
        let saga = saga_in(SagaStatus::Completed);
        assert!(matches!(
            decide(Some(&saga), &envelope(&event), &event),
            Decision::Unhandled
        ));
    }
}
