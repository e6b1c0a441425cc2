//! Durable message channel for the pipeline
//!
//! Provides:
//! - `MessageChannel`, the broker-agnostic contract (publish, receive, ack, nack)
//! - `Delivery`, a received message carrying its own acknowledgment handle
//! - An SQS backend, an in-process backend and a disconnected fallback
//! - The gated consumer loop both workers run

mod consumer;
pub mod memory;
mod messages;
mod sqs;

pub use consumer::{CircuitBreaker, Consumer, ConsumerOptions, DeliveryHandler, Settlement};
pub use memory::InMemoryChannel;
pub use messages::{
    CalculateRequest, FetchRequest, MessageKind, PipelineMessage, PipelinePayload, QueueNames,
    ResearcherRef,
};
pub use sqs::SqsChannel;

use crate::config::BrokerConfig;
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// A message as handed out by a backend, before it is wrapped in a `Delivery`
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub body: String,
    /// Backend handle used to settle the message
    pub receipt: String,
}

/// Broker-agnostic queue contract.
///
/// Publishing is durable: a message survives a broker restart once `publish`
/// returns. Delivery is at-least-once; a received message stays reserved until
/// it is acked, nacked, or the consumer goes away, after which the broker
/// hands it out again.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Whether a broker connection backs this channel
    fn is_connected(&self) -> bool {
        true
    }

    /// Publish a payload to the named queue
    async fn publish(&self, queue: &str, payload: String) -> Result<()>;

    /// Receive up to `max_messages`, waiting for the backend's poll timeout
    async fn receive(&self, queue: &str, max_messages: usize) -> Result<Vec<RawMessage>>;

    /// Remove a processed message
    async fn ack(&self, queue: &str, receipt: &str) -> Result<()>;

    /// Reject a message without requeueing it; the message is dropped
    async fn nack(&self, queue: &str, receipt: &str) -> Result<()>;

    /// Keep a message reserved for another `seconds`
    async fn extend(&self, _queue: &str, _receipt: &str, _seconds: u64) -> Result<()> {
        Ok(())
    }

    /// End the connection. Unsettled messages become available again.
    async fn close(&self) -> Result<()>;
}

/// Connect to the configured broker, or fall back to a channel that drops
/// everything it is given.
///
/// A broker outage at startup must not take the worker down; the failure is
/// logged and every later publish becomes a logged no-op.
pub async fn connect(config: &BrokerConfig) -> Arc<dyn MessageChannel> {
    match SqsChannel::connect(config).await {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            error!(error = %e, "Error connecting to message broker, publishing is disabled");
            Arc::new(DisconnectedChannel)
        }
    }
}

/// Fallback used when the broker could not be reached
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedChannel;

#[async_trait]
impl MessageChannel for DisconnectedChannel {
    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&self, queue: &str, _payload: String) -> Result<()> {
        error!(queue, "Cannot publish message, channel is not connected");
        Ok(())
    }

    async fn receive(&self, queue: &str, _max_messages: usize) -> Result<Vec<RawMessage>> {
        warn!(queue, "Cannot consume messages, channel is not connected");
        Ok(Vec::new())
    }

    async fn ack(&self, queue: &str, _receipt: &str) -> Result<()> {
        error!(queue, "Cannot acknowledge message, channel is not connected");
        Ok(())
    }

    async fn nack(&self, queue: &str, _receipt: &str) -> Result<()> {
        error!(queue, "Cannot nack message, channel is not connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Publish a typed pipeline message to the queue it belongs to
pub async fn publish_message(
    channel: &dyn MessageChannel,
    queues: &QueueNames,
    message: &PipelineMessage,
) -> Result<()> {
    let body = message.encode()?;
    channel.publish(queues.for_kind(message.kind()), body).await
}

/// A received message together with the handle that settles it.
///
/// `ack` and `nack` consume the delivery, so a message is settled at most
/// once. Dropping an unsettled delivery leaves the message reserved until the
/// broker redelivers it.
pub struct Delivery {
    queue: String,
    message: RawMessage,
    channel: Arc<dyn MessageChannel>,
    settled: bool,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        message: RawMessage,
        channel: Arc<dyn MessageChannel>,
    ) -> Self {
        Self {
            queue: queue.into(),
            message,
            channel,
            settled: false,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn body(&self) -> &str {
        &self.message.body
    }

    /// Decode the body as the payload this queue carries
    pub fn decode<T: PipelinePayload>(&self) -> Result<T> {
        T::decode(&self.message.body)
    }

    /// Handle for extending the reservation while the delivery is processed
    pub fn keepalive(&self) -> KeepAlive {
        KeepAlive {
            queue: self.queue.clone(),
            receipt: self.message.receipt.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Acknowledge successful processing
    pub async fn ack(mut self) -> Result<()> {
        self.settled = true;
        let result = self.channel.ack(&self.queue, &self.message.receipt).await;
        crate::metrics::record_settlement(&self.queue, "ack", result.is_ok());
        result
    }

    /// Reject without requeue
    pub async fn nack(mut self) -> Result<()> {
        self.settled = true;
        let result = self.channel.nack(&self.queue, &self.message.receipt).await;
        crate::metrics::record_settlement(&self.queue, "nack", result.is_ok());
        result
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                queue = %self.queue,
                message_id = %self.message.id,
                "Delivery dropped without ack or nack, broker will redeliver it"
            );
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("id", &self.message.id)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Extends a delivery's reservation without owning it
#[derive(Clone)]
pub struct KeepAlive {
    queue: String,
    receipt: String,
    channel: Arc<dyn MessageChannel>,
}

impl KeepAlive {
    pub async fn extend(&self, seconds: u64) -> Result<()> {
        self.channel.extend(&self.queue, &self.receipt, seconds).await
    }
}
