use anyhow::{anyhow, Result};
use async_nats::jetstream::{self, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;

/// A message delivered by a pull consumer that must be acked or nak'd exactly once
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    fn headers(&self) -> Option<&HeaderMap>;

    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgement: the broker schedules redelivery
    async fn nak(&self) -> Result<()>;
}

#[async_trait]
impl InboundMessage for jetstream::Message {
    fn subject(&self) -> &str {
        self.subject.as_str()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    async fn ack(&self) -> Result<()> {
        jetstream::Message::ack(self)
            .await
            .map_err(|e| anyhow!("Failed to ack message: {}", e))
    }

    async fn nak(&self) -> Result<()> {
        self.ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("Failed to nak message: {}", e))
    }
}

/// Trait for JetStream consumer operations
/// Abstracts the operations needed to create and use a NATS JetStream consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    /// Create (or bind to) a durable pull consumer on a stream
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Trait for pull consumer operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Fetch up to `max_messages`, returning early with a partial or empty
    /// batch once `expires` elapses
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<Box<dyn InboundMessage>>>;
}

/// Trait for JetStream publisher operations
/// Abstracts the operations needed to create streams and publish messages
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamPublisher: Send + Sync {
    /// Get an existing stream by name
    async fn get_stream(&self, stream_name: &str) -> Result<()>;

    /// Create a new stream with the given configuration
    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()>;

    /// Publish a message to a subject and await the JetStream acknowledgment
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()>;
}
