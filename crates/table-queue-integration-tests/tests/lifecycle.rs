//! Integration tests for the basic message lifecycle
//!
//! These tests verify:
//! - Send / fetch round trips through SQLite
//! - Acknowledged and rejected messages are removed
//! - Priority and age ordering
//! - Delayed messages stay hidden
//! - Messages without a handler are parked as UNDEFINED_HANDLER

mod common;

use common::{Recorder, TestQueue};
use serde_json::json;
use table_queue_core::{
    Config, Disposition, Priority, QueueName, Resolution, Status, Store,
};

fn orders() -> QueueName {
    QueueName::new("orders").unwrap()
}

#[tokio::test]
async fn test_send_fetch_round_trip() {
    let queue = TestQueue::new(Config::new()).await;

    let sent = queue
        .producer
        .send(
            queue
                .producer
                .create_message("orders", &json!({"x": 1}))
                .unwrap()
                .with_priority(Priority::High)
                .with_event("created"),
        )
        .await
        .unwrap();

    let fetched = queue.store.fetch_next(&[orders()]).await.unwrap().unwrap();

    assert_eq!(fetched, sent);
    assert_eq!(fetched.body(), "{\"x\":1}");
    assert_eq!(fetched.event(), Some("created"));
}

#[tokio::test]
async fn test_ack_scenario_deletes_row() {
    let queue = TestQueue::new(Config::new()).await;
    queue
        .producer
        .send(queue.producer.create_message("orders", &json!({"x": 1})).unwrap())
        .await
        .unwrap();

    let fetched = queue.store.fetch_next(&[orders()]).await.unwrap().unwrap();
    assert_eq!(fetched.queue(), &orders());
    assert_eq!(fetched.status(), Status::New);
    assert_eq!(fetched.priority().value(), 0);
    assert_eq!(fetched.attempts(), 0);

    let recorder = Recorder::new();
    let mut consumer = queue.consumer().await;
    consumer
        .bind("orders", recorder.processor(Disposition::Ack))
        .unwrap();

    let resolution = consumer.process_next(&[orders()]).await.unwrap();

    assert_eq!(resolution, Some(Resolution::Acknowledged));
    assert_eq!(recorder.bodies(), vec!["{\"x\":1}".to_string()]);
    assert!(queue.store.find(fetched.id().unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reject_removes_without_redelivery() {
    let queue = TestQueue::new(Config::new()).await;
    queue
        .producer
        .send(queue.producer.create_message("orders", "bad").unwrap())
        .await
        .unwrap();

    let recorder = Recorder::new();
    let mut consumer = queue.consumer().await;
    consumer
        .bind("orders", recorder.processor(Disposition::Reject))
        .unwrap();

    assert_eq!(
        consumer.process_next(&[]).await.unwrap(),
        Some(Resolution::Rejected)
    );
    assert_eq!(queue.store.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_lower_priority_value_first_then_oldest() {
    let queue = TestQueue::new(Config::new()).await;
    let producer = &queue.producer;

    for (body, priority) in [
        ("default-1", Priority::Default),
        ("very-high", Priority::VeryHigh),
        ("very-low", Priority::VeryLow),
        ("default-2", Priority::Default),
    ] {
        producer
            .send(producer.create_message("orders", body).unwrap().with_priority(priority))
            .await
            .unwrap();
        // Distinct creation times
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let recorder = Recorder::new();
    let mut consumer = queue.consumer().await;
    consumer
        .bind("orders", recorder.processor(Disposition::Ack))
        .unwrap();
    for _ in 0..4 {
        consumer.process_next(&[]).await.unwrap();
    }

    assert_eq!(
        recorder.bodies(),
        vec!["very-low", "default-1", "default-2", "very-high"]
    );
}

#[tokio::test]
async fn test_queue_filter() {
    let queue = TestQueue::new(Config::new()).await;
    let producer = &queue.producer;
    producer
        .send(producer.create_message("mail", "m").unwrap())
        .await
        .unwrap();

    assert!(queue.store.fetch_next(&[orders()]).await.unwrap().is_none());

    let fetched = queue
        .store
        .fetch_next(&[orders(), QueueName::new("mail").unwrap()])
        .await
        .unwrap();
    assert_eq!(fetched.unwrap().body(), "m");
}

#[tokio::test]
async fn test_delayed_message_hidden_until_due() {
    let queue = TestQueue::new(Config::new()).await;
    let producer = &queue.producer;
    producer
        .send(producer.create_message("orders", "later").unwrap().with_delay(3600))
        .await
        .unwrap();

    assert!(queue.store.fetch_next(&[]).await.unwrap().is_none());
    assert_eq!(queue.store.stats().await.unwrap().new, 1);
}

#[tokio::test]
async fn test_missing_handler_parks_message() {
    let queue = TestQueue::new(Config::new()).await;
    let original = queue
        .producer
        .send(queue.producer.create_message("orders", "x").unwrap())
        .await
        .unwrap();

    let consumer = queue.consumer().await;
    let resolution = consumer.process_next(&[]).await.unwrap();

    assert_eq!(resolution, Some(Resolution::UndefinedHandler { attempts: 1 }));
    assert!(queue
        .store
        .find(original.id().unwrap())
        .await
        .unwrap()
        .is_none());

    let parked = queue
        .store
        .list_by_status(Status::UndefinedHandler, Some(orders()), 10)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].attempts(), 1);
    assert_eq!(parked[0].body(), "x");

    // Parked messages are not fetched again
    assert!(consumer.process_next(&[]).await.unwrap().is_none());
}
