//! Tests for the producer.

use super::*;
use crate::error::ConfigError;
use crate::job::{Context, Disposition};
use crate::message::Priority;
use crate::stores::MemoryStore;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

struct Mailer;

#[async_trait]
impl Job for Mailer {
    async fn handle(&self, _ctx: Context) -> anyhow::Result<Disposition> {
        Ok(Disposition::Ack)
    }

    fn queue(&self) -> &str {
        "mail"
    }
}

struct Unregistered;

#[async_trait]
impl Job for Unregistered {
    async fn handle(&self, _ctx: Context) -> anyhow::Result<Disposition> {
        Ok(Disposition::Ack)
    }
}

fn producer_with(config: Config) -> (Producer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    (Producer::new(store.clone(), Arc::new(config)), store)
}

fn producer() -> (Producer, Arc<MemoryStore>) {
    producer_with(Config::new().register_job("mailer", Mailer).unwrap())
}

mod create_message {
    use super::*;

    #[test]
    fn test_string_body_is_stored_verbatim() {
        let (producer, _) = producer();
        let message = producer.create_message("orders", "plain text").unwrap();

        assert_eq!(message.body(), "plain text");
        assert_eq!(message.queue().as_str(), "orders");
        assert_eq!(message.status(), Status::New);
    }

    #[test]
    fn test_structured_body_is_serialized() {
        let (producer, _) = producer();
        let message = producer.create_message("orders", &json!({"x": 1})).unwrap();

        assert_eq!(message.body(), "{\"x\":1}");
    }

    #[test]
    fn test_struct_body_is_serialized() {
        #[derive(Serialize)]
        struct Order {
            id: u32,
        }

        let (producer, _) = producer();
        let message = producer.create_message("orders", &Order { id: 7 }).unwrap();

        assert_eq!(message.body(), "{\"id\":7}");
    }

    #[test]
    fn test_unrepresentable_body_is_serialization_error() {
        let (producer, _) = producer();
        let mut body = BTreeMap::new();
        body.insert((1, 2), "tuple keys are not valid JSON keys");

        let result = producer.create_message("orders", &body);
        assert!(matches!(
            result,
            Err(QueueError::Serialization(
                SerializationError::Unserializable { .. }
            ))
        ));
    }

    #[test]
    fn test_invalid_queue_is_validation_error() {
        let (producer, _) = producer();
        assert!(matches!(
            producer.create_message("bad queue", "x"),
            Err(QueueError::Validation(_))
        ));
    }
}

mod sending {
    use super::*;

    #[tokio::test]
    async fn test_send_assigns_id() {
        let (producer, store) = producer();
        let message = producer.create_message("orders", "x").unwrap();

        let sent = producer.send(message).await.unwrap();

        assert!(sent.is_persisted());
        assert_eq!(store.stats().await.unwrap().new, 1);
    }

    #[tokio::test]
    async fn test_dispatch_by_alias() {
        let (producer, _) = producer();

        let sent = producer
            .dispatch("mailer", &json!({"to": "a@b.c"}))
            .await
            .unwrap();

        assert_eq!(sent.queue().as_str(), "mail");
        assert_eq!(sent.event(), Some("mailer"));
        assert!(sent.is_job());
        assert_eq!(sent.body(), "{\"to\":\"a@b.c\"}");
    }

    #[tokio::test]
    async fn test_dispatch_by_type_uses_alias() {
        let (producer, _) = producer();

        let sent = producer.dispatch_job::<Mailer, _>(&json!({})).await.unwrap();

        assert_eq!(sent.event(), Some("mailer"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_job_is_config_error() {
        let (producer, store) = producer();

        let by_alias = producer.dispatch("unknown", &json!({})).await;
        let by_type = producer.dispatch_job::<Unregistered, _>(&json!({})).await;

        assert!(matches!(
            by_alias,
            Err(QueueError::Config(ConfigError::JobNotRegistered { .. }))
        ));
        assert!(matches!(by_type, Err(QueueError::Config(_))));
        assert_eq!(store.stats().await.unwrap().total(), 0);
    }
}

mod redelivery {
    use super::*;

    fn claimed(producer: &Producer) -> Message {
        let mut message = producer
            .create_message("orders", "x")
            .unwrap()
            .with_priority(Priority::High)
            .with_event("tag");
        message.set_status(Status::InProcess);
        message
    }

    #[test]
    fn test_new_and_in_process_become_redelivered() {
        let (producer, _) = producer();

        let fresh = producer.create_message("orders", "x").unwrap();
        assert_eq!(
            producer.make_redelivery_message(&fresh).status(),
            Status::Redelivered
        );

        let next = producer.make_redelivery_message(&claimed(&producer));
        assert_eq!(next.status(), Status::Redelivered);
        assert_eq!(next.priority(), Priority::High);
        assert_eq!(next.event(), Some("tag"));
        assert_eq!(next.attempts(), 1);
        assert!(!next.is_persisted());
    }

    #[test]
    fn test_other_statuses_carried_forward() {
        let (producer, _) = producer();
        let mut message = claimed(&producer);
        message.set_status(Status::UndefinedHandler);

        let next = producer.make_redelivery_message(&message);
        assert_eq!(next.status(), Status::UndefinedHandler);
        assert!(next.redelivered_at().is_some());
    }

    #[test]
    fn test_failure_has_no_redelivery_time() {
        let (producer, _) = producer();
        let mut message = claimed(&producer);
        message.set_status(Status::Failure);

        let next = producer.make_redelivery_message(&message);
        assert_eq!(next.status(), Status::Failure);
        assert_eq!(next.redelivered_at(), None);
    }

    #[test]
    fn test_redelivery_time_uses_config() {
        let (producer, _) = producer_with(Config::new().with_redelivery_time(100));
        let before = Timestamp::now();

        let next = producer.make_redelivery_message(&claimed(&producer));
        let at = next.redelivered_at().unwrap();

        assert!(at >= before.plus_seconds(100));
        assert!(at <= Timestamp::now().plus_seconds(100));
    }

    #[test]
    fn test_later_redelivery_time_is_kept() {
        let (producer, _) = producer_with(Config::new().with_redelivery_time(10));
        let far = Timestamp::now().plus_seconds(3600);
        let previous = Message::derive_redelivery(
            &claimed(&producer),
            Status::Redelivered,
            Some(far),
        );

        let next = producer.make_redelivery_message(&previous);
        assert_eq!(next.redelivered_at(), Some(far));
    }

    #[test]
    fn test_attempts_increase_by_one_per_derivation() {
        let (producer, _) = producer();
        let mut message = claimed(&producer);

        for expected in 1..=4 {
            message = producer.make_redelivery_message(&message);
            assert_eq!(message.attempts(), expected);
        }
    }
}
