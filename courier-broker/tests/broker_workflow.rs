use async_trait::async_trait;
use courier_broker::{
    Broker, BrokerConfig, Message, MessageHandler, PublishOptions, QueueDescriptor,
    SubscribeOptions,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct RecordingHandler {
    topics: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.topics.lock().unwrap().push(message.topic().to_string());
        Ok(())
    }
}

struct AlwaysFails {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageHandler for AlwaysFails {
    async fn handle(&self, _message: &Message) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("handler always fails")
    }
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(deadline, async {
        loop {
            if check() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn pattern_subscriber_sees_matching_topics_only() {
    let broker = Broker::new(BrokerConfig::default());
    let topics = Arc::new(Mutex::new(Vec::new()));
    broker.subscribe(
        "order.*",
        Arc::new(RecordingHandler {
            topics: topics.clone(),
        }),
        SubscribeOptions::default(),
    );

    broker.publish("order.created", serde_json::json!({}), PublishOptions::default());
    broker.publish("order.cancelled", serde_json::json!({}), PublishOptions::default());
    broker.publish("invoice.created", serde_json::json!({}), PublishOptions::default());

    assert!(
        wait_until(Duration::from_secs(2), || topics.lock().unwrap().len() == 2).await,
        "pattern subscriber never saw both order events"
    );

    let mut seen = topics.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["order.cancelled".to_string(), "order.created".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_land_in_the_dead_letter_list() {
    let broker = Broker::new(BrokerConfig::default());
    let handle = broker.start();

    let invocations = Arc::new(AtomicUsize::new(0));
    broker.subscribe(
        "todo.created",
        Arc::new(AlwaysFails {
            invocations: invocations.clone(),
        }),
        SubscribeOptions::builder()
            .retry_delay(Duration::from_millis(10))
            .build(),
    );

    broker.publish(
        "todo.created",
        serde_json::json!({"id": "t1"}),
        PublishOptions::builder().max_retries(2).build(),
    );

    assert!(
        wait_until(Duration::from_secs(5), || {
            broker.dead_letter_messages().len() == 1
        })
        .await,
        "message never reached the dead letter list"
    );

    // max_retries=2：首投 + 2 次重试 = 3 次调用
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    let entries = broker.dead_letter_messages();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_topic(), "todo.created");
    assert_eq!(entries[0].message().metadata().retry_count(), 3);
    assert_eq!(entries[0].error(), "handler always fails");
    assert_eq!(broker.statistics().dead_letter_count(), 1);

    handle.shutdown();
    handle.join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn one_failing_handler_never_blocks_the_others() {
    let broker = Broker::new(BrokerConfig::default());
    let topics = Arc::new(Mutex::new(Vec::new()));
    broker.subscribe(
        "todo.created",
        Arc::new(AlwaysFails {
            invocations: Arc::new(AtomicUsize::new(0)),
        }),
        SubscribeOptions::default(),
    );
    broker.subscribe(
        "todo.created",
        Arc::new(RecordingHandler {
            topics: topics.clone(),
        }),
        SubscribeOptions::default(),
    );

    // publish 对发布方即发即忘，下游失败不会传播
    broker.publish("todo.created", serde_json::json!({}), PublishOptions::default());

    assert!(
        wait_until(Duration::from_secs(2), || !topics.lock().unwrap().is_empty()).await,
        "healthy handler never received the message"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn event_append_flows_to_stream_and_projection() {
    let broker = Broker::new(BrokerConfig::default());
    let topics = Arc::new(Mutex::new(Vec::new()));
    broker.subscribe(
        "event.TodoCreated",
        Arc::new(RecordingHandler {
            topics: topics.clone(),
        }),
        SubscribeOptions::default(),
    );

    for n in 0..3 {
        broker
            .append_event(
                "todo-1",
                "TodoCreated",
                serde_json::json!({"n": n}),
                serde_json::Value::Null,
            )
            .unwrap();
    }

    let events = broker.get_events("todo-1", None).unwrap();
    let versions: Vec<u64> = events.iter().map(|e| e.version()).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    // 增量读取只返回版本大于游标的部分
    let tail = broker.get_events("todo-1", Some(1)).unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].version(), 2);

    assert!(
        wait_until(Duration::from_secs(2), || topics.lock().unwrap().len() == 3).await,
        "projection subscriber missed derived event notifications"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_statistics_are_recomputed_by_the_sweep() {
    let config = BrokerConfig {
        stats_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let broker = Broker::new(config);
    let handle = broker.start();

    broker
        .create_queue(QueueDescriptor::builder().name("todo.created".to_string()).build())
        .unwrap();
    broker.subscribe(
        "todo.created",
        Arc::new(RecordingHandler {
            topics: Arc::new(Mutex::new(Vec::new())),
        }),
        SubscribeOptions::default(),
    );

    for _ in 0..4 {
        broker.publish("todo.created", serde_json::json!({}), PublishOptions::default());
    }

    assert!(
        wait_until(Duration::from_secs(2), || {
            broker
                .get_queue("todo.created")
                .map(|(_, stats)| stats.message_count() == 4 && stats.consumer_count() == 1)
                .unwrap_or(false)
        })
        .await,
        "queue statistics never caught up"
    );

    handle.shutdown();
    handle.join().await;
}
