//! SQS-backed message channel
//!
//! SQS queues are durable, so every accepted publish survives a broker
//! restart. A nack without requeue deletes the message. Receipts of messages
//! currently being processed are tracked so that `close` can release them for
//! immediate redelivery instead of waiting out the visibility timeout.

use super::{MessageChannel, QueueNames, RawMessage};
use crate::config::BrokerConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use aws_types::region::Region;
use backoff::{future::retry, ExponentialBackoff};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQS allows at most ten messages per receive call
const MAX_BATCH: usize = 10;

/// SQS channel resolved against a fixed set of queues
pub struct SqsChannel {
    client: SqsClient,
    /// Queue name -> queue URL
    urls: HashMap<String, String>,
    wait_time_seconds: i32,
    visibility_timeout: i32,
    /// Receipt -> queue URL of messages received and not yet settled
    in_flight: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

impl SqsChannel {
    /// Build a client and make sure both pipeline queues exist.
    ///
    /// Queue creation is idempotent, so this asserts the queues rather than
    /// requiring them to be provisioned beforehand. Transient failures are
    /// retried with exponential backoff for `connect_budget_secs`.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&shared);
        if let Some(endpoint) = config.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }
        let client = SqsClient::from_conf(builder.build());

        let queues = QueueNames::from(config);
        let mut urls = HashMap::new();
        for name in queues.all() {
            let url = Self::assert_queue(&client, name, config.connect_budget_secs).await?;
            info!(queue = %name, url = %url, "Queue ready");
            urls.insert(name.to_string(), url);
        }

        info!(region = %config.region, "Connected to message broker");

        Ok(Self {
            client,
            urls,
            wait_time_seconds: config.wait_time_secs.min(20) as i32,
            visibility_timeout: config.visibility_timeout_secs as i32,
            in_flight: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn assert_queue(client: &SqsClient, name: &str, budget_secs: u64) -> Result<String> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(budget_secs)),
            ..Default::default()
        };

        retry(policy, || async move {
            let output = client
                .create_queue()
                .queue_name(name)
                .send()
                .await
                .map_err(|e| {
                    warn!(queue = %name, error = %DisplayErrorContext(&e), "Queue assertion failed, retrying");
                    backoff::Error::transient(AppError::BrokerUnavailable {
                        message: DisplayErrorContext(&e).to_string(),
                    })
                })?;

            output.queue_url.ok_or_else(|| {
                backoff::Error::permanent(AppError::BrokerUnavailable {
                    message: format!("broker returned no URL for queue {}", name),
                })
            })
        })
        .await
    }

    fn url(&self, queue: &str) -> Result<&str> {
        self.urls
            .get(queue)
            .map(String::as_str)
            .ok_or_else(|| AppError::QueueError {
                message: format!("queue {} was not declared on this channel", queue),
            })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::QueueError {
                message: "channel is closed".to_string(),
            });
        }
        Ok(())
    }

    fn track(&self, receipt: &str, url: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(receipt.to_string(), url.to_string());
        }
    }

    fn untrack(&self, receipt: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(receipt);
        }
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        let url = self.url(queue)?;
        self.client
            .delete_message()
            .queue_url(url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", DisplayErrorContext(&e)),
            })?;
        self.untrack(receipt);
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for SqsChannel {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn publish(&self, queue: &str, payload: String) -> Result<()> {
        self.ensure_open()?;
        let url = self.url(queue)?;

        let result = self
            .client
            .send_message()
            .queue_url(url)
            .message_body(payload)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", DisplayErrorContext(&e)),
            })?;

        debug!(queue, message_id = %result.message_id.unwrap_or_default(), "Message sent to queue");
        Ok(())
    }

    async fn receive(&self, queue: &str, max_messages: usize) -> Result<Vec<RawMessage>> {
        self.ensure_open()?;
        let url = self.url(queue)?;

        let result = self
            .client
            .receive_message()
            .queue_url(url)
            .max_number_of_messages(max_messages.clamp(1, MAX_BATCH) as i32)
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", DisplayErrorContext(&e)),
            })?;

        let mut messages = Vec::new();
        for message in result.messages.unwrap_or_default() {
            let (Some(receipt), Some(body)) = (message.receipt_handle, message.body) else {
                warn!(queue, "Skipping message without receipt handle or body");
                continue;
            };
            self.track(&receipt, url);
            messages.push(RawMessage {
                id: message.message_id.unwrap_or_default(),
                body,
                receipt,
            });
        }

        debug!(queue, count = messages.len(), "Received messages from queue");
        Ok(messages)
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<()> {
        self.delete(queue, receipt).await?;
        debug!(queue, "Message acknowledged");
        Ok(())
    }

    async fn nack(&self, queue: &str, receipt: &str) -> Result<()> {
        // No requeue: the message is removed and must be re-triggered upstream
        self.delete(queue, receipt).await?;
        debug!(queue, "Message rejected without requeue");
        Ok(())
    }

    async fn extend(&self, queue: &str, receipt: &str, seconds: u64) -> Result<()> {
        let url = self.url(queue)?;
        self.client
            .change_message_visibility()
            .queue_url(url)
            .receipt_handle(receipt)
            .visibility_timeout(seconds as i32)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", DisplayErrorContext(&e)),
            })?;

        debug!(queue, seconds, "Extended message visibility");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let unsettled: Vec<(String, String)> = self
            .in_flight
            .lock()
            .map(|mut in_flight| in_flight.drain().collect())
            .unwrap_or_default();

        for (receipt, url) in &unsettled {
            if let Err(e) = self
                .client
                .change_message_visibility()
                .queue_url(url)
                .receipt_handle(receipt)
                .visibility_timeout(0)
                .send()
                .await
            {
                warn!(error = %DisplayErrorContext(&e), "Failed to release unsettled message");
            }
        }

        info!(released = unsettled.len(), "Message channel closed");
        Ok(())
    }
}
