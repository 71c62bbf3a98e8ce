//! 演示：发布/订阅、死信、事件流派生通知与 Saga 补偿的完整走读
use async_trait::async_trait;
use courier_broker::saga::SagaStep;
use courier_broker::{
    Broker, BrokerConfig, BrokerError, FnStep, Message, MessageHandler, PublishOptions,
    QueueDescriptor, SubscribeOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct AuditLogger;

#[async_trait]
impl MessageHandler for AuditLogger {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        tracing::info!(topic = message.topic(), payload = %message.payload(), "audit");
        Ok(())
    }
}

struct FlakyMailer;

#[async_trait]
impl MessageHandler for FlakyMailer {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        Err(BrokerError::Handler {
            handler: "flaky-mailer".to_string(),
            reason: format!("smtp unreachable for {}", message.id()),
        }
        .into())
    }
}

struct TodoProjection;

#[async_trait]
impl MessageHandler for TodoProjection {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        tracing::info!(payload = %message.payload(), "projection updated");
        Ok(())
    }
}

fn create_todo_steps() -> Vec<Arc<dyn SagaStep>> {
    vec![
        Arc::new(FnStep::new(
            "validate",
            |ctx| async move {
                tracing::info!(%ctx, "validate todo");
                Ok(serde_json::json!({"valid": true}))
            },
            |_ctx| async move { Ok(()) },
        )),
        Arc::new(FnStep::new(
            "persist",
            |_ctx| async move { Ok(serde_json::json!({"todo_id": "t-42"})) },
            |_ctx| async move {
                tracing::info!("rolling back persisted todo");
                Ok(())
            },
        )),
        Arc::new(FnStep::new(
            "notify",
            |_ctx| async move { anyhow::bail!("notification service down") },
            |_ctx| async move { Ok(()) },
        )),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker = Broker::new(BrokerConfig {
        stats_interval: Duration::from_millis(200),
        saga_tick_interval: Duration::from_millis(100),
        ..Default::default()
    });
    let handle = broker.start();

    // 发布/订阅：通配审计订阅 + 必然失败的处理器（最终进入死信列表）
    broker.subscribe("todo.#", Arc::new(AuditLogger), SubscribeOptions::default());
    broker.subscribe(
        "todo.created",
        Arc::new(FlakyMailer),
        SubscribeOptions::builder()
            .retry_delay(Duration::from_millis(50))
            .build(),
    );
    broker.create_queue(QueueDescriptor::builder().name("todo.created".to_string()).build())?;

    broker.publish(
        "todo.created",
        serde_json::json!({"id": "t1", "title": "buy milk"}),
        PublishOptions::builder().max_retries(2).build(),
    );

    // 事件流：追加即在 event.<类型> 主题上发布派生通知
    broker.subscribe("event.TodoCreated", Arc::new(TodoProjection), SubscribeOptions::default());
    broker.append_event(
        "todo-t1",
        "TodoCreated",
        serde_json::json!({"title": "buy milk"}),
        serde_json::Value::Null,
    )?;

    // Saga：第三步失败后逆序补偿，终态 failed
    let saga_id = broker.start_saga(
        "create_todo",
        create_todo_steps(),
        serde_json::json!({"title": "buy milk"}),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;

    let saga = broker.get_saga(saga_id).await?;
    tracing::info!(state = ?saga.state(), steps = ?saga.steps(), "saga finished");

    for entry in broker.dead_letter_messages() {
        tracing::warn!(
            topic = entry.original_topic(),
            error = entry.error(),
            "dead letter"
        );
    }
    tracing::info!(stats = ?broker.statistics(), "broker statistics");

    handle.shutdown();
    handle.join().await;
    Ok(())
}
