//! Redpanda order queue for the makeline.
//!
//! This crate provides [`RedpandaOrderQueue`], an [`OrderQueue`] backed by a
//! Kafka-compatible consumer (Redpanda, Apache Kafka, Azure Event Hubs' Kafka
//! endpoint, ...). It uses rdkafka.
//!
//! # Polling Model
//!
//! [`receive_orders`](OrderQueue::receive_orders) is a single non-blocking
//! drain: it collects messages until the batch is full or no message arrives
//! within the poll timeout, then returns. An idle topic therefore yields an
//! empty batch after one poll timeout.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Offsets are committed by [`acknowledge`](OrderQueue::acknowledge), after
//!   the caller has stored the batch
//! - A poll that finds an unacknowledged batch first seeks back to its start,
//!   so a failed insert is retried by the next intake
//! - If the process dies before the commit, the group redelivers the batch
//! - Duplicates are absorbed by the repository's idempotent insert
//! - Messages that are not valid orders are logged and skipped; their offsets
//!   are committed with the rest of the batch
//!
//! # Example
//!
//! ```no_run
//! use makeline_redpanda::RedpandaOrderQueue;
//! use makeline_core::queue::OrderQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaOrderQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("orders")
//!     .consumer_group("makeline-service")
//!     .build()?;
//!
//! let orders = queue.receive_orders().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use makeline_core::order::Order;
use makeline_core::queue::{OrderQueue, QueueError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default maximum number of messages per poll.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default time to wait for the next message before ending a poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Bound on a single partition seek when rewinding.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Offsets consumed but not yet committed, per partition.
#[derive(Debug, Default)]
struct Uncommitted {
    /// First offset handed out since the last commit.
    first: HashMap<i32, i64>,
    /// Offset to commit (one past the last message handed out).
    next: HashMap<i32, i64>,
}

impl Uncommitted {
    fn track(&mut self, partition: i32, offset: i64) {
        self.first.entry(partition).or_insert(offset);
        let next = self.next.entry(partition).or_insert(offset + 1);
        *next = (*next).max(offset + 1);
    }
}

/// Order queue backed by a Redpanda/Kafka consumer group.
///
/// The consumer is created and subscribed once, at build time. The service
/// keeps it for its whole lifetime; every intake request polls the same
/// consumer, so the group's committed offsets track what has been taken in.
pub struct RedpandaOrderQueue {
    /// Subscribed consumer
    consumer: StreamConsumer,
    /// Topic orders are published to
    topic: String,
    /// Maximum messages per poll
    batch_size: usize,
    /// Idle wait that ends a poll
    poll_timeout: Duration,
    /// Positions handed out since the last acknowledgement
    uncommitted: Mutex<Uncommitted>,
}

impl RedpandaOrderQueue {
    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaOrderQueueBuilder {
        RedpandaOrderQueueBuilder::default()
    }

    /// Topic this queue consumes.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn uncommitted(&self) -> MutexGuard<'_, Uncommitted> {
        self.uncommitted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeks every partition with an unacknowledged batch back to its start.
    fn rewind_unacknowledged(&self) {
        let first = self.uncommitted().first.clone();

        for (partition, offset) in first {
            match self
                .consumer
                .seek(&self.topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
            {
                Ok(()) => tracing::info!(
                    topic = %self.topic,
                    partition,
                    offset,
                    "Rewound to unacknowledged orders"
                ),
                Err(e) => tracing::warn!(
                    topic = %self.topic,
                    partition,
                    offset,
                    error = %e,
                    "Failed to rewind; orders are redelivered after a restart"
                ),
            }
        }
    }
}

/// Builder for configuring a [`RedpandaOrderQueue`].
///
/// # Example
///
/// ```no_run
/// use makeline_redpanda::RedpandaOrderQueue;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaOrderQueue::builder()
///     .brokers("my-namespace.servicebus.windows.net:9093")
///     .topic("orders")
///     .security_protocol("SASL_SSL")
///     .sasl("PLAIN", "$ConnectionString", "Endpoint=sb://...")
///     .batch_size(50)
///     .poll_timeout(Duration::from_millis(500))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaOrderQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    batch_size: Option<usize>,
    poll_timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    security_protocol: Option<String>,
    sasl: Option<(String, String, String)>,
}

impl RedpandaOrderQueueBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic orders are read from.
    ///
    /// Default: "orders"
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Every replica of the service should use the same group so that each
    /// order is handed to only one of them (barring redelivery).
    ///
    /// Default: "makeline-service"
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the maximum number of messages returned by one poll.
    ///
    /// Default: [`DEFAULT_BATCH_SIZE`]
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set how long a poll waits for the next message before returning.
    ///
    /// Default: [`DEFAULT_POLL_TIMEOUT`]
    #[must_use]
    pub const fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = Some(poll_timeout);
        self
    }

    /// Set where a new consumer group starts reading.
    ///
    /// Default: "earliest", so orders placed before the first deployment are
    /// not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set `security.protocol` (e.g. "`SASL_SSL`").
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Authenticate with SASL.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some((mechanism.into(), username.into(), password.into()));
        self
    }

    /// Build the [`RedpandaOrderQueue`] and subscribe it to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Batch size is zero
    /// - Cannot create or subscribe the consumer
    pub fn build(self) -> Result<RedpandaOrderQueue, QueueError> {
        let brokers = self.brokers.ok_or_else(|| {
            QueueError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let topic = self.topic.unwrap_or_else(|| "orders".to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "makeline-service".to_string());
        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(QueueError::ConnectionFailed(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        let poll_timeout = self.poll_timeout.unwrap_or(DEFAULT_POLL_TIMEOUT);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("group.id", &consumer_group)
            .set("enable.auto.commit", "false") // Committed after each batch
            .set("auto.offset.reset", &auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        if let Some(protocol) = &self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some((mechanism, username, password)) = &self.sasl {
            config
                .set("sasl.mechanism", mechanism)
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = config.create().map_err(|e| {
            QueueError::ConnectionFailed(format!("Failed to create consumer: {e}"))
        })?;
        consumer.subscribe(&[topic.as_str()]).map_err(|e| {
            QueueError::ConnectionFailed(format!("Failed to subscribe to {topic}: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            batch_size,
            poll_timeout_ms = u64::try_from(poll_timeout.as_millis()).unwrap_or(u64::MAX),
            auto_offset_reset = %auto_offset_reset,
            "RedpandaOrderQueue subscribed"
        );

        Ok(RedpandaOrderQueue {
            consumer,
            topic,
            batch_size,
            poll_timeout,
            uncommitted: Mutex::new(Uncommitted::default()),
        })
    }
}

impl OrderQueue for RedpandaOrderQueue {
    fn receive_orders(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, QueueError>> + Send + '_>> {
        Box::pin(async move {
            self.rewind_unacknowledged();

            let mut orders = Vec::new();
            let mut positions = Vec::new();
            let mut received = 0_usize;

            while received < self.batch_size {
                let message = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
                    Err(_) => break, // Nothing more visible right now
                    Ok(Err(e)) if received == 0 => {
                        tracing::error!(topic = %self.topic, error = %e, "Failed to poll order queue");
                        return Err(QueueError::ReceiveFailed(e.to_string()));
                    },
                    Ok(Err(e)) => {
                        tracing::warn!(
                            topic = %self.topic,
                            error = %e,
                            received,
                            "Poll failed mid-batch, returning partial batch"
                        );
                        break;
                    },
                    Ok(Ok(message)) => message,
                };
                received += 1;
                positions.push((message.partition(), message.offset()));

                let Some(payload) = message.payload() else {
                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        "Skipping order message with no payload"
                    );
                    continue;
                };

                match Order::from_queue_message(payload) {
                    Ok(order) => {
                        tracing::trace!(
                            partition = message.partition(),
                            offset = message.offset(),
                            order_id = %order.order_id,
                            "Received order"
                        );
                        orders.push(order);
                    },
                    Err(e) => {
                        tracing::warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            error = %e,
                            "Skipping undecodable order message"
                        );
                    },
                }
            }

            {
                let mut uncommitted = self.uncommitted();
                for (partition, offset) in positions {
                    uncommitted.track(partition, offset);
                }
            }

            tracing::debug!(
                topic = %self.topic,
                received,
                decoded = orders.len(),
                "Polled order queue"
            );
            Ok(orders)
        })
    }

    fn acknowledge(&self) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            let next = std::mem::take(&mut *self.uncommitted()).next;
            if next.is_empty() {
                return Ok(());
            }

            let mut offsets = TopicPartitionList::new();
            for (partition, offset) in &next {
                offsets
                    .add_partition_offset(&self.topic, *partition, Offset::Offset(*offset))
                    .map_err(|e| QueueError::AcknowledgeFailed(e.to_string()))?;
            }

            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| {
                    tracing::warn!(
                        topic = %self.topic,
                        error = %e,
                        "Failed to commit offsets (orders may be redelivered)"
                    );
                    QueueError::AcknowledgeFailed(e.to_string())
                })?;

            tracing::debug!(topic = %self.topic, partitions = next.len(), "Committed order offsets");
            Ok(())
        })
    }
}
