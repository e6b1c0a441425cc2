//! Gated consumer loop
//!
//! One loop per queue. A delivery is only received once the concurrency gate
//! admits it, and each admitted delivery runs as its own task holding the
//! gate permit until it is settled.

use super::{Delivery, KeepAlive, MessageChannel};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

/// How a handler settled its delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
}

/// Processes one delivery and settles it
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Settlement;
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Deliveries processed at the same time
    pub concurrency: usize,
    /// Consecutive failures before the loop pauses
    pub max_consecutive_failures: u32,
    pub circuit_break: Duration,
    /// Interval for extending the reservation of a delivery being processed
    pub heartbeat: Option<Duration>,
    /// Reservation length requested on every heartbeat
    pub visibility_secs: u64,
    /// Pause after a failed receive
    pub receive_backoff: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_consecutive_failures: 5,
            circuit_break: Duration::from_secs(30),
            heartbeat: None,
            visibility_secs: 300,
            receive_backoff: Duration::from_secs(5),
        }
    }
}

/// Counts consecutive failures and opens once the threshold is reached
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn record(&self, settlement: Settlement) {
        match settlement {
            Settlement::Acked => self.failures.store(0, Ordering::Release),
            Settlement::Rejected => {
                self.failures.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.failures() >= self.threshold
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
    }
}

/// Consumer bound to one queue of a channel
pub struct Consumer {
    channel: Arc<dyn MessageChannel>,
    queue: String,
    options: ConsumerOptions,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        queue: impl Into<String>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            channel,
            queue: queue.into(),
            options,
        }
    }

    /// Run until `shutdown` flips to true or its sender goes away.
    ///
    /// Returns once every admitted delivery has finished.
    pub async fn run<H: DeliveryHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let concurrency = self.options.concurrency.max(1);
        let gate = Arc::new(Semaphore::new(concurrency));
        let breaker = Arc::new(CircuitBreaker::new(self.options.max_consecutive_failures));

        info!(queue = %self.queue, concurrency, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if breaker.is_open() {
                warn!(
                    queue = %self.queue,
                    failures = breaker.failures(),
                    "Circuit breaker open, pausing..."
                );
                crate::metrics::record_circuit_open(&self.queue);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.options.circuit_break) => {}
                }
                breaker.reset();
                info!(queue = %self.queue, "Circuit breaker reset, resuming...");
            }

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = gate.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.channel.receive(&self.queue, 1) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    breaker.record(Settlement::Rejected);
                    error!(queue = %self.queue, error = %e, "Failed to receive messages from queue");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.options.receive_backoff) => {}
                    }
                    continue;
                }
            };

            let mut permit = Some(permit);
            for message in messages {
                let permit = match permit.take() {
                    Some(permit) => permit,
                    None => match gate.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                debug!(queue = %self.queue, message_id = %message.id, "Delivery admitted");
                let delivery = Delivery::new(self.queue.clone(), message, self.channel.clone());
                let handler = handler.clone();
                let breaker = breaker.clone();
                let heartbeat = self.options.heartbeat;
                let visibility_secs = self.options.visibility_secs;

                tokio::spawn(async move {
                    let _permit = permit;
                    let keepalive = delivery.keepalive();
                    let work = handler.handle(delivery);
                    let settlement = match heartbeat {
                        Some(every) => {
                            with_heartbeat(work, keepalive, every, visibility_secs).await
                        }
                        None => work.await,
                    };
                    breaker.record(settlement);
                });
            }
        }

        info!(queue = %self.queue, "Consumer stopping, waiting for in-flight deliveries");
        // Every permit back means every spawned delivery has finished
        let _ = gate.acquire_many(concurrency as u32).await;
        info!(queue = %self.queue, "Consumer stopped");
    }
}

/// Drive `work` to completion, extending the delivery's reservation on every tick
async fn with_heartbeat<F>(
    work: F,
    keepalive: KeepAlive,
    every: Duration,
    visibility_secs: u64,
) -> Settlement
where
    F: Future<Output = Settlement>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            settlement = &mut work => return settlement,
            _ = ticker.tick() => {
                if let Err(e) = keepalive.extend(visibility_secs).await {
                    warn!(error = %e, "Failed to extend delivery reservation");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryChannel;
    use std::sync::atomic::AtomicUsize;

    struct SlowHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
        delay: Duration,
    }

    impl SlowHandler {
        fn new(delay: Duration) -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl DeliveryHandler for SlowHandler {
        async fn handle(&self, delivery: Delivery) -> Settlement {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            delivery.ack().await.unwrap();
            Settlement::Acked
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_gate_of_one_is_sequential() {
        let channel = Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_millis(10)));
        for i in 0..3 {
            channel.publish("fetch", format!("m{}", i)).await.unwrap();
        }

        let handler = Arc::new(SlowHandler::new(Duration::from_millis(20)));
        let (tx, rx) = watch::channel(false);
        let consumer = Consumer::new(channel.clone(), "fetch", ConsumerOptions::default());
        let task = tokio::spawn(consumer.run(handler.clone(), rx));

        wait_for(|| channel.ack_count("fetch") == 3).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 3);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wider_gate_runs_in_parallel() {
        let channel = Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_millis(10)));
        for i in 0..4 {
            channel.publish("calc", format!("m{}", i)).await.unwrap();
        }

        let handler = Arc::new(SlowHandler::new(Duration::from_millis(100)));
        let (tx, rx) = watch::channel(false);
        let options = ConsumerOptions {
            concurrency: 4,
            ..Default::default()
        };
        let task = tokio::spawn(Consumer::new(channel.clone(), "calc", options).run(handler.clone(), rx));

        wait_for(|| channel.ack_count("calc") == 4).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(handler.peak.load(Ordering::SeqCst) > 1);
        assert!(handler.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight() {
        let channel = Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_millis(10)));
        channel.publish("fetch", "only".to_string()).await.unwrap();

        let handler = Arc::new(SlowHandler::new(Duration::from_millis(150)));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(
            Consumer::new(channel.clone(), "fetch", ConsumerOptions::default()).run(handler.clone(), rx),
        );

        wait_for(|| channel.in_flight("fetch") == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        // The run future only returns after the delivery settled
        assert_eq!(channel.ack_count("fetch"), 1);
        assert_eq!(channel.in_flight("fetch"), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_extends_long_deliveries() {
        let channel = Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_millis(10)));
        channel.publish("fetch", "slow".to_string()).await.unwrap();

        let handler = Arc::new(SlowHandler::new(Duration::from_millis(120)));
        let (tx, rx) = watch::channel(false);
        let options = ConsumerOptions {
            heartbeat: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let consumer = Consumer::new(channel.clone(), "fetch", options);
        let task = tokio::spawn(consumer.run(handler.clone(), rx));

        wait_for(|| channel.ack_count("fetch") == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(channel.extension_count("fetch") >= 2);
    }

    #[tokio::test]
    async fn test_no_heartbeat_without_interval() {
        let channel = Arc::new(InMemoryChannel::with_poll_timeout(Duration::from_millis(10)));
        channel.publish("calc", "quick".to_string()).await.unwrap();

        let handler = Arc::new(SlowHandler::new(Duration::from_millis(60)));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(
            Consumer::new(channel.clone(), "calc", ConsumerOptions::default()).run(handler.clone(), rx),
        );

        wait_for(|| channel.ack_count("calc") == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(channel.extension_count("calc"), 0);
    }

    #[test]
    fn test_circuit_breaker_opens_and_resets() {
        let breaker = CircuitBreaker::new(2);
        breaker.record(Settlement::Rejected);
        assert!(!breaker.is_open());

        breaker.record(Settlement::Acked);
        breaker.record(Settlement::Rejected);
        assert!(!breaker.is_open());

        breaker.record(Settlement::Rejected);
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 0);
    }
}
