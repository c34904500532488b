//! End-to-end behaviour of the client against the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use brokerlink_sdk::{
    BrokerClient, ClassificationError, ConnectionConfig, ConsumedMessage, Error, ErrorOrigin,
    FlowOutput, ListenerError, MemoryBroker, MessageId, MonitorOptions, OutgoingRecord,
    ProducerService, ServiceKind, SubscribeOptions, TransportError,
};
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client(broker: &MemoryBroker) -> BrokerClient {
    init_tracing();
    BrokerClient::new(ConnectionConfig::default(), broker.clone())
}

/// Wait until `done` holds, or give up after a second.
async fn eventually(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn every_message_is_delivered_once_in_order() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    client.consumer().on_message(move |message| {
        let seen = seen_clone.clone();
        async move {
            seen.lock().push(message.offset);
            Ok(())
        }
    });
    client
        .consumer()
        .subscribe(["events"], SubscribeOptions::new())
        .await
        .unwrap();

    for i in 0..200 {
        client
            .producer()
            .send("events", OutgoingRecord::new(i.to_string()))
            .await
            .unwrap();
    }
    eventually(|| seen.lock().len() == 200).await;

    assert!(client.disconnect().await.is_success());
    assert_eq!(*seen.lock(), (0..200).collect::<Vec<i64>>());
}

#[tokio::test]
async fn listener_failure_on_one_message_does_not_block_the_next() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let delivered_clone = delivered.clone();
    client.consumer().on_message(move |message| {
        let delivered = delivered_clone.clone();
        async move {
            let value = message.value_str().unwrap_or_default().to_string();
            if value == "2" {
                panic!("cannot handle {}", value);
            }
            if value == "3" {
                return Err::<(), ListenerError>("rejected".into());
            }
            delivered.lock().push(value);
            Ok(())
        }
    });
    let errors_clone = errors.clone();
    client.consumer().on_error(move |event| {
        let errors = errors_clone.clone();
        async move {
            errors.lock().push(event);
            Ok(())
        }
    });

    client
        .consumer()
        .subscribe(["work"], SubscribeOptions::new())
        .await
        .unwrap();
    for value in ["1", "2", "3", "4"] {
        broker.publish("work", OutgoingRecord::new(value));
    }
    eventually(|| delivered.lock().len() == 2 && errors.lock().len() == 2).await;
    client.disconnect().await.into_result().unwrap();

    assert_eq!(*delivered.lock(), vec!["1", "4"]);
    let errors = errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.origin == ErrorOrigin::Listener));
    assert_eq!(errors[0].message, Some(MessageId::new("work", 0, 1)));
    assert_eq!(errors[0].cause.to_string(), "listener panicked: cannot handle 2");
    assert_eq!(errors[1].message, Some(MessageId::new("work", 0, 2)));
}

#[tokio::test]
async fn orders_scenario_counts_all_and_emits_one_flow_output() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let flows: Arc<Mutex<Vec<FlowOutput>>> = Arc::new(Mutex::new(Vec::new()));

    let flows_clone = flows.clone();
    client.monitor().on_flow_output(move |output| {
        let flows = flows_clone.clone();
        async move {
            flows.lock().push(output);
            Ok(())
        }
    });
    client
        .monitor()
        .start_monitoring(Some(vec!["orders".to_string()]))
        .await
        .unwrap();

    client
        .producer()
        .send_json("orders", &serde_json::json!({"orderId": 1}))
        .await
        .unwrap();
    client
        .producer()
        .send_json("orders", &serde_json::json!({"orderId": 2, "flowId": "fulfilment", "stage": "shipped"}))
        .await
        .unwrap();
    client
        .producer()
        .send_json("orders", &serde_json::json!({"orderId": 3}))
        .await
        .unwrap();

    eventually(|| {
        client
            .monitor()
            .stats("orders")
            .map(|s| s.count == 3)
            .unwrap_or(false)
    })
    .await;
    client.disconnect().await.into_result().unwrap();

    let flows = flows.lock();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].flow, "fulfilment");
    assert_eq!(flows[0].stage.as_deref(), Some("shipped"));
    assert_eq!(flows[0].source(), MessageId::new("orders", 0, 1));

    let stats = client.monitor().stats("orders").unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.flow_outputs, 1);
    assert_eq!(stats.classification_errors, 0);
    assert!(stats.first_seen_ms <= stats.last_seen_ms);
}

#[tokio::test]
async fn non_matching_messages_still_update_statistics() {
    let broker = MemoryBroker::new();
    let client = BrokerClient::builder(ConnectionConfig::default())
        .classifier(
            |message: &ConsumedMessage| -> Result<Option<FlowOutput>, ClassificationError> {
                Ok(message
                    .key_str()
                    .map(|flow| FlowOutput::new(flow, message.clone())))
            },
        )
        .monitor_options(MonitorOptions::new().topics(["a", "b"]))
        .build(broker.clone());

    client.monitor().start_monitoring(None).await.unwrap();
    broker.publish("a", OutgoingRecord::new("x").with_key("flow-a"));
    broker.publish("a", OutgoingRecord::new("y"));
    broker.publish("b", OutgoingRecord::new("z"));

    eventually(|| client.monitor().stats_snapshot().total_messages() == 3).await;
    client.disconnect().await.into_result().unwrap();

    let snapshot = client.monitor().stats_snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.get("a").unwrap().count, 2);
    assert_eq!(snapshot.get("a").unwrap().flow_outputs, 1);
    assert_eq!(snapshot.get("b").unwrap().count, 1);
    assert_eq!(snapshot.get("b").unwrap().flow_outputs, 0);
    assert!(snapshot.get("b").unwrap().last_seen_ms > 0);
}

#[tokio::test]
async fn consumer_and_monitor_receive_the_same_topic_independently() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let consumed = Arc::new(Mutex::new(0usize));

    let consumed_clone = consumed.clone();
    client.consumer().on_message(move |_| {
        let consumed = consumed_clone.clone();
        async move {
            *consumed.lock() += 1;
            Ok(())
        }
    });
    client
        .consumer()
        .subscribe(["shared"], SubscribeOptions::new())
        .await
        .unwrap();
    client
        .monitor()
        .start_monitoring(Some(vec!["shared".to_string()]))
        .await
        .unwrap();

    let mut groups = broker.active_groups();
    groups.sort();
    assert_eq!(groups, vec!["brokerlink-consumer", "brokerlink-monitor"]);

    for _ in 0..5 {
        broker.publish("shared", OutgoingRecord::new("{}"));
    }
    eventually(|| {
        *consumed.lock() == 5
            && client.monitor().stats("shared").map(|s| s.count) == Some(5)
    })
    .await;

    assert!(client.disconnect().await.is_success());
    assert_eq!(*consumed.lock(), 5);
    assert_eq!(broker.subscriber_count(), 0);
}

#[tokio::test]
async fn repeated_disconnect_emits_nothing() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let events = Arc::new(Mutex::new(0usize));

    let events_clone = events.clone();
    client.consumer().on_error(move |_| {
        let events = events_clone.clone();
        async move {
            *events.lock() += 1;
            Ok(())
        }
    });
    client
        .consumer()
        .subscribe(["t"], SubscribeOptions::new())
        .await
        .unwrap();

    assert!(client.disconnect().await.is_success());
    assert!(client.disconnect().await.is_success());
    assert!(client.consumer().disconnect().await.is_ok());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*events.lock(), 0);
    assert!(!client.consumer().is_subscribed().await);
}

#[tokio::test]
async fn orchestrator_reports_a_single_failing_service() {
    let broker = MemoryBroker::new();
    let client = client(&broker);

    client.admin().list_topics().await.unwrap();
    client
        .producer()
        .send("t", OutgoingRecord::new("x"))
        .await
        .unwrap();
    client
        .consumer()
        .subscribe(["t"], SubscribeOptions::new())
        .await
        .unwrap();
    broker.fail_next_unsubscribe(TransportError::Connection("broker went away".into()));

    let report = client.disconnect().await;

    assert!(!report.is_success());
    assert_eq!(
        report.succeeded(),
        vec![ServiceKind::Admin, ServiceKind::Producer, ServiceKind::Monitor]
    );
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ServiceKind::Consumer);
    assert!(matches!(
        failures[0].1,
        Error::Transport(TransportError::Connection(_))
    ));

    assert!(!client.consumer().is_subscribed().await);
    assert!(!client.admin().is_connected().await);
    assert!(!client.producer().is_connected().await);
}

#[tokio::test]
async fn unreachable_broker_fails_subscribe_and_monitoring() {
    let broker = MemoryBroker::new();
    broker.set_unreachable(true);
    let client = client(&broker);

    let consumer = client
        .consumer()
        .subscribe(["t"], SubscribeOptions::new())
        .await;
    let monitor = client.monitor().start_monitoring(None).await;

    assert!(consumer.unwrap_err().is_connection());
    assert!(monitor.unwrap_err().is_connection());
    assert!(client.disconnect().await.is_success());
}

#[tokio::test]
async fn connection_loss_is_reported_as_error_event() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let errors = Arc::new(Mutex::new(Vec::new()));

    let errors_clone = errors.clone();
    client.consumer().on_error(move |event| {
        let errors = errors_clone.clone();
        async move {
            errors.lock().push((event.origin, event.cause.to_string()));
            Ok(())
        }
    });
    client
        .consumer()
        .subscribe(["t"], SubscribeOptions::new())
        .await
        .unwrap();

    broker.drop_connections();
    eventually(|| !errors.lock().is_empty()).await;

    assert_eq!(
        *errors.lock(),
        vec![(
            ErrorOrigin::Transport,
            "Connection failed: connection lost".to_string()
        )]
    );
    assert!(client.consumer().is_subscribed().await);
    assert!(client.disconnect().await.is_success());
}

#[tokio::test]
async fn producer_keeps_working_after_a_subscription_is_lost() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    client
        .consumer()
        .subscribe(["t"], SubscribeOptions::new())
        .await
        .unwrap();

    broker.drop_connections();
    tokio::time::sleep(Duration::from_millis(20)).await;

    for i in 0..200 {
        let sent = tokio::time::timeout(
            Duration::from_millis(500),
            client.producer().send("t", OutgoingRecord::new(i.to_string())),
        )
        .await;
        assert!(sent.is_ok(), "send #{} to 't' stalled", i);
        sent.unwrap().unwrap();
    }

    assert_eq!(broker.records("t").len(), 200);
    assert!(client.consumer().is_subscribed().await);
    assert!(client.disconnect().await.is_success());
}

#[tokio::test]
async fn listener_can_republish_to_its_own_subscription() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let producer = Arc::new(ProducerService::new(
        Arc::new(ConnectionConfig::default()),
        Arc::new(broker.clone()),
    ));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    client.consumer().on_message(move |message| {
        let seen = seen_clone.clone();
        let producer = producer.clone();
        async move {
            seen.lock().push(message.topic.clone());
            if message.topic == "in" {
                for i in 0..5 {
                    producer
                        .send("in-retry", OutgoingRecord::new(i.to_string()))
                        .await?;
                }
            }
            Ok(())
        }
    });
    client
        .consumer()
        .subscribe(["in", "in-retry"], SubscribeOptions::new())
        .await
        .unwrap();

    client
        .producer()
        .send("in", OutgoingRecord::new("job"))
        .await
        .unwrap();
    eventually(|| seen.lock().len() == 6).await;
    assert!(client.disconnect().await.is_success());

    let seen = seen.lock();
    assert_eq!(seen.len(), 6);
    assert_eq!(seen[0], "in");
    assert!(seen[1..].iter().all(|topic| topic == "in-retry"));
}
