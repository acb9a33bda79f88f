//! Bounded redelivery with a terminal dead-letter stage.
//!
//! Attempt counts ride on the `x-attempts` header of the message itself, so
//! no consumer keeps retry state. Headers arrive from the wire and are
//! untrusted: the count is parsed defensively and clamped before use.

use lapin::types::{AMQPValue, FieldTable};
use tracing::{error, warn};

use crate::bus::{BusError, EventPublisher};
use crate::contracts::{dead_key, retry_key, ATTEMPTS_HEADER, DEAD_LETTER_EXCHANGE, FINAL_ERROR_HEADER};

pub const MAX_ATTEMPTS: u32 = 3;

/// Outcome of routing a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Republished for another attempt after the delay queue's TTL.
    Retried { attempt: u32 },
    /// Attempts exhausted; parked on the service's dead-letter queue.
    DeadLettered { attempts: u32 },
}

pub struct RetryPolicy {
    service: String,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Attempts already made, read from `x-attempts` and clamped to
    /// `0..=max`. Missing, unparseable, negative or absurdly large values
    /// all land inside that range.
    pub fn attempts(&self, headers: Option<&FieldTable>) -> u32 {
        let raw = headers
            .and_then(|table| table.inner().get(ATTEMPTS_HEADER))
            .and_then(parse_count)
            .unwrap_or(0);
        raw.clamp(0, i64::from(self.max_attempts)) as u32
    }

    /// Routes a failed delivery: schedules another attempt while the budget
    /// allows, otherwise parks the message with its final error attached.
    /// The original payload bytes and unrelated headers travel unchanged.
    pub async fn on_failure(
        &self,
        publisher: &dyn EventPublisher,
        headers: Option<&FieldTable>,
        payload: &[u8],
        error: &str,
    ) -> Result<RetryAction, BusError> {
        let made = (self.attempts(headers) + 1).min(self.max_attempts);
        let mut table = headers.cloned().unwrap_or_default();
        table.insert(ATTEMPTS_HEADER.into(), AMQPValue::LongInt(made as i32));

        if made < self.max_attempts {
            warn!(
                "{} attempt {}/{} failed: {}; scheduling retry",
                self.service, made, self.max_attempts, error
            );
            publisher
                .publish_raw(
                    DEAD_LETTER_EXCHANGE,
                    &retry_key(&self.service),
                    payload,
                    table,
                )
                .await?;
            Ok(RetryAction::Retried { attempt: made })
        } else {
            error!(
                "{} exhausted {} attempts: {}; dead-lettering",
                self.service, made, error
            );
            table.insert(FINAL_ERROR_HEADER.into(), AMQPValue::LongString(error.into()));
            publisher
                .publish_raw(
                    DEAD_LETTER_EXCHANGE,
                    &dead_key(&self.service),
                    payload,
                    table,
                )
                .await?;
            Ok(RetryAction::DeadLettered { attempts: made })
        }
    }
}

fn parse_count(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes()).ok()?.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryPublisher, PublishedMessage};

    fn attempts_of(message: &PublishedMessage) -> Option<i64> {
        message.headers.inner().get(ATTEMPTS_HEADER).and_then(parse_count)
    }

    fn with_attempts(value: AMQPValue) -> FieldTable {
        let mut table = FieldTable::default();
        table.insert(ATTEMPTS_HEADER.into(), value);
        table
    }

    #[tokio::test]
    async fn first_failure_schedules_retry_with_attempt_one() {
        let policy = RetryPolicy::new("notify");
        let publisher = MemoryPublisher::new();

        let action = policy
            .on_failure(&publisher, None, b"payload-bytes", "smtp down")
            .await
            .unwrap();
        assert_eq!(action, RetryAction::Retried { attempt: 1 });

        let messages = publisher.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].exchange, DEAD_LETTER_EXCHANGE);
        assert_eq!(messages[0].routing_key, "notify.retry");
        assert_eq!(messages[0].payload, b"payload-bytes");
        assert_eq!(attempts_of(&messages[0]), Some(1));
        assert!(messages[0].headers.inner().get(FINAL_ERROR_HEADER).is_none());
    }

    #[tokio::test]
    async fn attempts_progress_then_dead_letter() {
        let policy = RetryPolicy::new("notify");
        let publisher = MemoryPublisher::new();

        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongInt(1))),
                b"p",
                "smtp down",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::Retried { attempt: 2 });

        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongInt(2))),
                b"p",
                "smtp down",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::DeadLettered { attempts: 3 });

        let messages = publisher.messages().await;
        assert_eq!(messages[1].routing_key, "notify.dead");
        assert_eq!(attempts_of(&messages[1]), Some(3));
        match messages[1].headers.inner().get(FINAL_ERROR_HEADER) {
            Some(AMQPValue::LongString(s)) => {
                assert_eq!(std::str::from_utf8(s.as_bytes()).unwrap(), "smtp down")
            }
            other => panic!("missing final error header: {:?}", other),
        }
    }

    #[tokio::test]
    async fn forged_attempt_counts_are_clamped() {
        let policy = RetryPolicy::new("notify");
        let publisher = MemoryPublisher::new();

        // A huge count cannot overflow past the cap; it dead-letters at 3.
        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongLongInt(i64::MAX))),
                b"p",
                "boom",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::DeadLettered { attempts: 3 });

        // Negative counts behave like a first attempt.
        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongInt(-7))),
                b"p",
                "boom",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::Retried { attempt: 1 });

        // Stringly-typed counts still parse.
        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongString("2".into()))),
                b"p",
                "boom",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::DeadLettered { attempts: 3 });

        // Garbage is treated as absent.
        let action = policy
            .on_failure(
                &publisher,
                Some(&with_attempts(AMQPValue::LongString("many".into()))),
                b"p",
                "boom",
            )
            .await
            .unwrap();
        assert_eq!(action, RetryAction::Retried { attempt: 1 });
    }

    #[tokio::test]
    async fn exhausting_all_attempts_dead_letters_exactly_once() {
        let policy = RetryPolicy::new("notify");
        let publisher = MemoryPublisher::new();

        // Simulate a handler that fails every delivery, feeding each
        // republished message back in as the broker would after its TTL.
        let mut headers: Option<FieldTable> = None;
        let mut dead = 0;
        for _ in 0..MAX_ATTEMPTS {
            let action = policy
                .on_failure(&publisher, headers.as_ref(), b"p", "always fails")
                .await
                .unwrap();
            match action {
                RetryAction::Retried { .. } => {
                    let messages = publisher.messages().await;
                    headers = Some(messages.last().unwrap().headers.clone());
                }
                RetryAction::DeadLettered { attempts } => {
                    assert_eq!(attempts, 3);
                    dead += 1;
                }
            }
        }
        assert_eq!(dead, 1);

        let messages = publisher.messages().await;
        let dead_messages: Vec<_> = messages
            .iter()
            .filter(|m| m.routing_key == "notify.dead")
            .collect();
        assert_eq!(dead_messages.len(), 1);
        assert_eq!(attempts_of(dead_messages[0]), Some(3));
    }

    #[tokio::test]
    async fn unrelated_headers_survive_the_retry_hop() {
        let policy = RetryPolicy::new("inventory");
        let publisher = MemoryPublisher::new();

        let mut headers = with_attempts(AMQPValue::LongInt(1));
        headers.insert("traceparent".into(), AMQPValue::LongString("00-abc-def-01".into()));

        let action = policy
            .on_failure(&publisher, Some(&headers), b"p", "db unavailable")
            .await
            .unwrap();
        assert_eq!(action, RetryAction::Retried { attempt: 2 });

        let messages = publisher.messages().await;
        assert_eq!(messages[0].routing_key, "inventory.retry");
        match messages[0].headers.inner().get("traceparent") {
            Some(AMQPValue::LongString(s)) => {
                assert_eq!(std::str::from_utf8(s.as_bytes()).unwrap(), "00-abc-def-01")
            }
            other => panic!("traceparent dropped: {:?}", other),
        }
    }
}
