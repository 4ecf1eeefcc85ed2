use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::info;

use crate::models::job::JobDescriptor;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Publishing side of the job queue.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Consuming side of the job queue: a lazy, unbounded sequence of deliveries.
#[async_trait]
pub trait JobConsumer: Send + Sync {
    async fn consume(&self) -> Result<DeliveryStream, QueueError>;
}

pub type DeliveryStream = BoxStream<'static, Result<QueueDelivery, QueueError>>;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;

    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// One message handed to the worker along with the handle that settles it.
pub struct QueueDelivery {
    pub payload: Vec<u8>,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    pub acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for QueueDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDelivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// RabbitMQ-backed job queue.
///
/// Both the API and the worker declare the same durable queue before use, so
/// whichever process starts first creates it.
pub struct AmqpJobQueue {
    connection: Connection,
    channel: Channel,
    queue_name: String,
    prefetch: u16,
}

impl AmqpJobQueue {
    #[tracing::instrument(name = "Connecting to RabbitMQ", skip(amqp_url))]
    pub async fn connect(
        amqp_url: &str,
        queue_name: &str,
        prefetch: u16,
    ) -> Result<Self, QueueError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(amqp_url, properties).await?;
        let channel = connection.create_channel().await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let queue_declare_options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        // Idempotent
        channel
            .queue_declare(queue_name, queue_declare_options, FieldTable::default())
            .await?;

        info!(
            queue = queue_name,
            "Successfully declared queue with properties: {:?}", queue_declare_options
        );

        Ok(Self {
            connection,
            channel,
            queue_name: queue_name.to_string(),
            prefetch: prefetch.max(1),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl JobPublisher for AmqpJobQueue {
    #[tracing::instrument(name = "Publishing job", skip(self, job), fields(job_id = %job.job_id))]
    async fn publish(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let payload = job.to_bytes()?;
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type("application/json".into())
            .with_message_id(job.job_id.to_string().into())
            .with_timestamp(Utc::now().timestamp() as u64);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(QueueError::Rejected(format!(
                "broker did not confirm job {}",
                job.job_id
            )));
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.connection.status().connected() && self.channel.status().connected() {
            Ok(())
        } else {
            Err(QueueError::Disconnected)
        }
    }
}

#[async_trait]
impl JobConsumer for AmqpJobQueue {
    async fn consume(&self) -> Result<DeliveryStream, QueueError> {
        // Never hold more unacknowledged messages than the worker can run.
        self.channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue_name, prefetch = self.prefetch, "Consuming job queue");

        Ok(consumer
            .map(|delivery| delivery.map(QueueDelivery::from).map_err(QueueError::from))
            .boxed())
    }
}

impl From<Delivery> for QueueDelivery {
    fn from(delivery: Delivery) -> Self {
        Self {
            payload: delivery.data,
            redelivered: delivery.redelivered,
            acker: Box::new(AmqpAcker(delivery.acker)),
        }
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("RabbitMQ error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Message rejected by broker: {0}")]
    Rejected(String),

    #[error("Queue connection is closed")]
    Disconnected,
}
