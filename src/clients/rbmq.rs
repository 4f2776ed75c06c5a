use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tracing::{debug, info};

use crate::{
    config::Config,
    error::QueueError,
    models::task::{DeadLetter, DispatchTask, TaskHandle},
    queue::TaskQueue,
};

/// RabbitMQ task queue. Retries go through a delay queue whose expired
/// messages dead-letter back into the dispatch queue.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    dispatch_queue_name: String,
    retry_queue_name: String,
    failed_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|_| anyhow!("Failed to connect to RabbitMQ"))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        channel
            .queue_declare(&config.dispatch_queue_name, durable_queue(), FieldTable::default())
            .await
            .map_err(|_| anyhow!("Failed to declare dispatch queue"))?;

        let mut retry_args = FieldTable::default();
        retry_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from("")),
        );
        retry_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(config.dispatch_queue_name.as_str())),
        );

        channel
            .queue_declare(&config.retry_queue_name, durable_queue(), retry_args)
            .await
            .map_err(|_| anyhow!("Failed to declare retry queue"))?;

        channel
            .queue_declare(&config.failed_queue_name, durable_queue(), FieldTable::default())
            .await
            .map_err(|_| anyhow!("Failed to declare failed queue"))?;

        info!(
            dispatch_queue = %config.dispatch_queue_name,
            retry_queue = %config.retry_queue_name,
            failed_queue = %config.failed_queue_name,
            "RabbitMQ queues declared"
        );

        Ok(Self {
            connection,
            channel,
            dispatch_queue_name: config.dispatch_queue_name.clone(),
            retry_queue_name: config.retry_queue_name.clone(),
            failed_queue_name: config.failed_queue_name.clone(),
        })
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.dispatch_queue_name,
                "dispatch_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        info!(queue = %self.dispatch_queue_name, "Consumer created for queue");

        Ok(consumer)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties
                    .with_content_type(ShortString::from("application/json"))
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        Ok(())
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

#[async_trait]
impl TaskQueue for RabbitMqClient {
    async fn enqueue(&self, task: &DispatchTask) -> Result<TaskHandle, QueueError> {
        let payload = serde_json::to_vec(task)?;
        let properties =
            BasicProperties::default().with_message_id(ShortString::from(task.task_id.as_str()));

        self.publish(&self.dispatch_queue_name, &payload, properties)
            .await?;

        debug!(
            task_id = %task.task_id,
            notification_id = %task.notification_id,
            "Dispatch task enqueued"
        );

        Ok(TaskHandle {
            id: task.task_id.clone(),
        })
    }

    async fn schedule_retry(&self, task: &DispatchTask, delay: Duration) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(task)?;
        let properties = BasicProperties::default()
            .with_message_id(ShortString::from(task.task_id.as_str()))
            .with_expiration(ShortString::from(delay.as_millis().to_string()));

        self.publish(&self.retry_queue_name, &payload, properties)
            .await
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(letter)?;

        self.publish(&self.failed_queue_name, &payload, BasicProperties::default())
            .await
    }
}
