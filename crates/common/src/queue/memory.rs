//! In-process message channel
//!
//! Same settlement semantics as the broker backend: received messages stay
//! reserved until acked or nacked, nack drops the message, and `close` makes
//! every unsettled message available again. Used by tests and local runs.

use super::{MessageChannel, RawMessage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<RawMessage>,
    in_flight: HashMap<String, RawMessage>,
    published: Vec<String>,
    acks: usize,
    nacks: usize,
    extensions: usize,
}

/// Message channel held entirely in memory
pub struct InMemoryChannel {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    poll_timeout: Duration,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_poll_timeout(Duration::from_millis(50))
    }

    /// How long `receive` waits on an empty queue before returning nothing
    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            poll_timeout,
        }
    }

    fn with_queue<R>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> R) -> Result<R> {
        let mut queues = self.queues.lock().map_err(|_| AppError::QueueError {
            message: "in-memory channel lock poisoned".to_string(),
        })?;
        Ok(f(queues.entry(queue.to_string()).or_default()))
    }

    fn read<R: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> R) -> R {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(f))
            .unwrap_or_default()
    }

    fn take_ready(&self, queue: &str, max_messages: usize) -> Result<Vec<RawMessage>> {
        self.with_queue(queue, |state| {
            let count = max_messages.min(state.ready.len());
            let taken: Vec<RawMessage> = state.ready.drain(..count).collect();
            for message in &taken {
                state.in_flight.insert(message.receipt.clone(), message.clone());
            }
            taken
        })
    }

    /// Every payload ever published to `queue`, in order
    pub fn published(&self, queue: &str) -> Vec<String> {
        self.read(queue, |s| s.published.clone())
    }

    /// Messages waiting to be received
    pub fn pending(&self, queue: &str) -> usize {
        self.read(queue, |s| s.ready.len())
    }

    /// Messages received but not yet settled
    pub fn in_flight(&self, queue: &str) -> usize {
        self.read(queue, |s| s.in_flight.len())
    }

    pub fn ack_count(&self, queue: &str) -> usize {
        self.read(queue, |s| s.acks)
    }

    pub fn nack_count(&self, queue: &str) -> usize {
        self.read(queue, |s| s.nacks)
    }

    /// Reservation extensions granted on `queue`
    pub fn extension_count(&self, queue: &str) -> usize {
        self.read(queue, |s| s.extensions)
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, queue: &str, payload: String) -> Result<()> {
        self.with_queue(queue, |state| {
            state.published.push(payload.clone());
            state.ready.push_back(RawMessage {
                id: Uuid::new_v4().to_string(),
                body: payload,
                receipt: Uuid::new_v4().to_string(),
            });
        })?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str, max_messages: usize) -> Result<Vec<RawMessage>> {
        let notified = self.notify.notified();
        let messages = self.take_ready(queue, max_messages)?;
        if !messages.is_empty() {
            return Ok(messages);
        }

        // Long poll: wait for a publish or give up after the timeout
        let _ = tokio::time::timeout(self.poll_timeout, notified).await;
        self.take_ready(queue, max_messages)
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<()> {
        self.with_queue(queue, |state| {
            state.in_flight.remove(receipt).map(|_| state.acks += 1)
        })?
        .ok_or_else(|| AppError::QueueError {
            message: format!("unknown receipt {} on {}", receipt, queue),
        })
    }

    async fn nack(&self, queue: &str, receipt: &str) -> Result<()> {
        self.with_queue(queue, |state| {
            state.in_flight.remove(receipt).map(|_| state.nacks += 1)
        })?
        .ok_or_else(|| AppError::QueueError {
            message: format!("unknown receipt {} on {}", receipt, queue),
        })
    }

    async fn extend(&self, queue: &str, receipt: &str, _seconds: u64) -> Result<()> {
        self.with_queue(queue, |state| {
            state.in_flight.contains_key(receipt).then(|| state.extensions += 1)
        })?
        .ok_or_else(|| AppError::QueueError {
            message: format!("cannot extend settled receipt {} on {}", receipt, queue),
        })
    }

    async fn close(&self) -> Result<()> {
        let mut queues = self.queues.lock().map_err(|_| AppError::QueueError {
            message: "in-memory channel lock poisoned".to_string(),
        })?;
        for state in queues.values_mut() {
            let unsettled: Vec<RawMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
            for message in unsettled.into_iter().rev() {
                state.ready.push_front(message);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_reserves_until_ack() {
        let channel = InMemoryChannel::new();
        channel.publish("q", "one".to_string()).await.unwrap();
        channel.publish("q", "two".to_string()).await.unwrap();

        let batch = channel.receive("q", 1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "one");
        assert_eq!(channel.pending("q"), 1);
        assert_eq!(channel.in_flight("q"), 1);

        channel.ack("q", &batch[0].receipt).await.unwrap();
        assert_eq!(channel.in_flight("q"), 0);
        assert_eq!(channel.ack_count("q"), 1);

        // Settling twice is an error
        assert!(channel.ack("q", &batch[0].receipt).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_drops_message() {
        let channel = InMemoryChannel::new();
        channel.publish("q", "poison".to_string()).await.unwrap();

        let batch = channel.receive("q", 10).await.unwrap();
        channel.nack("q", &batch[0].receipt).await.unwrap();

        assert_eq!(channel.nack_count("q"), 1);
        assert_eq!(channel.pending("q"), 0);
        assert!(channel.receive("q", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_redelivers_unsettled() {
        let channel = InMemoryChannel::new();
        channel.publish("q", "a".to_string()).await.unwrap();
        channel.publish("q", "b".to_string()).await.unwrap();

        let batch = channel.receive("q", 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        channel.ack("q", &batch[1].receipt).await.unwrap();

        channel.close().await.unwrap();

        let redelivered = channel.receive("q", 10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].body, "a");
    }

    #[tokio::test]
    async fn test_extend_only_unsettled() {
        let channel = InMemoryChannel::new();
        channel.publish("q", "slow".to_string()).await.unwrap();
        let batch = channel.receive("q", 1).await.unwrap();

        tokio_test::assert_ok!(channel.extend("q", &batch[0].receipt, 300).await);
        assert_eq!(channel.extension_count("q"), 1);

        channel.ack("q", &batch[0].receipt).await.unwrap();
        tokio_test::assert_err!(channel.extend("q", &batch[0].receipt, 300).await);
        assert_eq!(channel.extension_count("q"), 1);
    }

    #[tokio::test]
    async fn test_empty_receive_times_out() {
        let channel = InMemoryChannel::with_poll_timeout(Duration::from_millis(5));
        assert!(channel.receive("empty", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let channel =
            std::sync::Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_secs(5)));
        let publisher = channel.clone();

        let waiter = tokio::spawn({
            let channel = channel.clone();
            async move { channel.receive("q", 1).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish("q", "late".to_string()).await.unwrap();

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }
}
