use crate::nats::traits::{InboundMessage, JetStreamConsumer, PullConsumer};
use anyhow::{anyhow, Result};
use async_nats::jetstream;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of processing one fetched batch.
///
/// `ack` and `nak` hold message indices. `error` marks the batch as fatal: the
/// consumer still settles every ack/nak, then stops.
#[derive(Debug, Default)]
pub struct ProcessingResult {
    pub ack: Vec<usize>,
    pub nak: Vec<(usize, Option<String>)>,
    pub error: Option<anyhow::Error>,
}

impl ProcessingResult {
    /// Create a result where all messages should be acknowledged
    pub fn ack_all(count: usize) -> Self {
        Self {
            ack: (0..count).collect(),
            ..Default::default()
        }
    }

    /// Create a result where all messages are rejected and the consumer must stop
    pub fn nak_all(count: usize, error: anyhow::Error) -> Self {
        let reason = format!("{:#}", error);
        Self {
            ack: Vec::new(),
            nak: (0..count).map(|i| (i, Some(reason.clone()))).collect(),
            error: Some(error),
        }
    }

    /// Create a result with specific ack/nak indices
    pub fn new(ack: Vec<usize>, nak: Vec<(usize, Option<String>)>) -> Self {
        Self {
            ack,
            nak,
            error: None,
        }
    }
}

/// Takes a slice of fetched messages and decides which to ack and which to nak.
/// Deserialization and business logic live in the processor.
pub type BatchProcessor =
    Box<dyn Fn(&[Box<dyn InboundMessage>]) -> BoxFuture<'static, ProcessingResult> + Send + Sync>;

/// Fail-stop JetStream pull consumer.
///
/// Each iteration runs fetch, process, then ack/nak strictly in sequence. Any
/// fetch error, acknowledgement error or fatal processing result ends `run`
/// with an error; restarting is left to the process supervisor.
pub struct NatsConsumer {
    consumer: Box<dyn PullConsumer>,
    batch_size: usize,
    max_wait: Duration,
    processor: BatchProcessor,
}

impl NatsConsumer {
    pub async fn new(
        jetstream: &dyn JetStreamConsumer,
        stream_name: &str,
        consumer_name: &str,
        subject_filter: &str,
        batch_size: usize,
        max_wait_secs: u64,
        processor: BatchProcessor,
    ) -> Result<Self> {
        debug!(
            stream = stream_name,
            consumer = consumer_name,
            subject = subject_filter,
            "Creating JetStream consumer"
        );

        let consumer = jetstream
            .create_consumer(
                jetstream::consumer::pull::Config {
                    name: Some(consumer_name.to_string()),
                    durable_name: Some(consumer_name.to_string()),
                    filter_subject: subject_filter.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
                stream_name,
            )
            .await?;

        info!(
            stream = stream_name,
            consumer = consumer_name,
            "Consumer created successfully"
        );

        Ok(Self {
            consumer,
            batch_size,
            max_wait: Duration::from_secs(max_wait_secs),
            processor,
        })
    }

    /// Run until cancelled (Ok) or until a batch fails (Err).
    /// Cancellation is observed between batches; a fetched batch is always settled.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!("Starting consumer loop");

        loop {
            if ctx.is_cancelled() {
                info!("Received shutdown signal, stopping consumer");
                break;
            }

            if let Err(e) = self.fetch_and_process_batch().await {
                error!(error = %format!("{:#}", e), "Consumer loop stopped on batch failure");
                return Err(e);
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    async fn fetch_and_process_batch(&self) -> Result<()> {
        debug!(
            batch_size = self.batch_size,
            max_wait_secs = self.max_wait.as_secs(),
            "Fetching message batch"
        );

        let messages = self
            .consumer
            .fetch_messages(self.batch_size, self.max_wait)
            .await?;

        if messages.is_empty() {
            debug!("No messages in batch");
            return Ok(());
        }

        debug!(message_count = messages.len(), "Received message batch");

        let result = (self.processor)(messages.as_slice()).await;
        let settle_failures = settle(&messages, result.ack, result.nak).await;

        if let Some(e) = result.error {
            return Err(e);
        }

        if settle_failures > 0 {
            return Err(anyhow!(
                "failed to settle {} of {} messages",
                settle_failures,
                messages.len()
            ));
        }

        Ok(())
    }
}

/// Attempt every ack and nak, returning how many failed
async fn settle(
    messages: &[Box<dyn InboundMessage>],
    ack: Vec<usize>,
    nak: Vec<(usize, Option<String>)>,
) -> usize {
    let mut failures = 0;

    let ack_count = ack.len();
    for idx in ack {
        let Some(msg) = messages.get(idx) else {
            warn!(
                message_index = idx,
                batch_size = messages.len(),
                "Invalid ack index in ProcessingResult"
            );
            continue;
        };

        if let Err(e) = msg.ack().await {
            error!(error = %e, message_index = idx, "Failed to acknowledge message");
            failures += 1;
        }
    }

    if ack_count > 0 {
        debug!(ack_count, "Acknowledged messages");
    }

    let nak_count = nak.len();
    for (idx, reason) in nak {
        let Some(msg) = messages.get(idx) else {
            warn!(
                message_index = idx,
                batch_size = messages.len(),
                "Invalid nak index in ProcessingResult"
            );
            continue;
        };

        match reason {
            Some(err) => error!(
                message_index = idx,
                subject = %msg.subject(),
                error = %err,
                "Rejecting message due to processing error"
            ),
            None => warn!(message_index = idx, subject = %msg.subject(), "Rejecting message"),
        }

        if let Err(e) = msg.nak().await {
            error!(error = %e, message_index = idx, "Failed to reject message");
            failures += 1;
        }
    }

    if nak_count > 0 {
        debug!(nak_count, "Rejected messages for redelivery");
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::traits::{MockJetStreamConsumer, MockPullConsumer};
    use async_nats::HeaderMap;
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Settled {
        Pending,
        Acked,
        Naked,
    }

    struct FakeMessage {
        payload: Vec<u8>,
        state: Arc<Mutex<Settled>>,
        fail_ack: bool,
    }

    #[async_trait]
    impl InboundMessage for FakeMessage {
        fn subject(&self) -> &str {
            "processed_envelopes.device-1"
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn headers(&self) -> Option<&HeaderMap> {
            None
        }

        async fn ack(&self) -> Result<()> {
            if self.fail_ack {
                return Err(anyhow!("ack timed out"));
            }
            *self.state.lock().unwrap() = Settled::Acked;
            Ok(())
        }

        async fn nak(&self) -> Result<()> {
            *self.state.lock().unwrap() = Settled::Naked;
            Ok(())
        }
    }

    fn batch(count: usize, fail_ack: bool) -> (Vec<Box<dyn InboundMessage>>, Vec<Arc<Mutex<Settled>>>) {
        let states: Vec<_> = (0..count)
            .map(|_| Arc::new(Mutex::new(Settled::Pending)))
            .collect();
        let messages = states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                Box::new(FakeMessage {
                    payload: vec![i as u8],
                    state: state.clone(),
                    fail_ack,
                }) as Box<dyn InboundMessage>
            })
            .collect();
        (messages, states)
    }

    fn consumer_with(pull: MockPullConsumer, processor: BatchProcessor) -> NatsConsumer {
        NatsConsumer {
            consumer: Box::new(pull),
            batch_size: 10,
            max_wait: Duration::from_millis(10),
            processor,
        }
    }

    #[tokio::test]
    async fn test_new_creates_durable_explicit_ack_consumer() {
        let mut js = MockJetStreamConsumer::new();
        js.expect_create_consumer()
            .withf(|config: &jetstream::consumer::pull::Config, stream: &str| {
                config.durable_name.as_deref() == Some("analytics_worker")
                    && config.filter_subject == "processed_envelopes.>"
                    && config.ack_policy == jetstream::consumer::AckPolicy::Explicit
                    && stream == "processed_envelopes"
            })
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let consumer = NatsConsumer::new(
            &js,
            "processed_envelopes",
            "analytics_worker",
            "processed_envelopes.>",
            30,
            5,
            Box::new(|msgs| {
                let count = msgs.len();
                async move { ProcessingResult::ack_all(count) }.boxed()
            }),
        )
        .await
        .unwrap();

        assert_eq!(consumer.batch_size, 30);
        assert_eq!(consumer.max_wait, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_successful_batch_acks_every_message() {
        let (messages, states) = batch(3, false);
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .return_once(move |_, _| Ok(messages));

        let consumer = consumer_with(
            pull,
            Box::new(|msgs| {
                let count = msgs.len();
                async move { ProcessingResult::ack_all(count) }.boxed()
            }),
        );

        consumer.fetch_and_process_batch().await.unwrap();

        for state in states {
            assert_eq!(*state.lock().unwrap(), Settled::Acked);
        }
    }

    #[tokio::test]
    async fn test_fatal_batch_naks_everything_and_stops_loop() {
        let (messages, states) = batch(4, false);
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .return_once(move |_, _| Ok(messages));

        let consumer = consumer_with(
            pull,
            Box::new(|msgs| {
                let count = msgs.len();
                async move { ProcessingResult::nak_all(count, anyhow!("store unavailable")) }
                    .boxed()
            }),
        );

        let result = consumer.run(CancellationToken::new()).await;

        assert!(result.unwrap_err().to_string().contains("store unavailable"));
        for state in states {
            assert_eq!(*state.lock().unwrap(), Settled::Naked);
        }
    }

    #[tokio::test]
    async fn test_ack_failure_is_fatal() {
        let (messages, _states) = batch(2, true);
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .return_once(move |_, _| Ok(messages));

        let consumer = consumer_with(
            pull,
            Box::new(|msgs| {
                let count = msgs.len();
                async move { ProcessingResult::ack_all(count) }.boxed()
            }),
        );

        let err = consumer.fetch_and_process_batch().await.unwrap_err();
        assert!(err.to_string().contains("failed to settle 2 of 2"));
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_loop() {
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .returning(|_, _| Err(anyhow!("connection closed")));

        let consumer = consumer_with(
            pull,
            Box::new(|_| async { ProcessingResult::default() }.boxed()),
        );

        assert!(consumer.run(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_fetch_skips_processor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let counter = calls.clone();
        let consumer = consumer_with(
            pull,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { ProcessingResult::default() }.boxed()
            }),
        );

        consumer.fetch_and_process_batch().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_fetch() {
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages().times(0);

        let consumer = consumer_with(
            pull,
            Box::new(|_| async { ProcessingResult::default() }.boxed()),
        );

        let ctx = CancellationToken::new();
        ctx.cancel();

        assert!(consumer.run(ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_lets_fetched_batch_settle() {
        let ctx = CancellationToken::new();
        let (messages, states) = batch(2, false);

        let mut pull = MockPullConsumer::new();
        let cancel_on_fetch = ctx.clone();
        pull.expect_fetch_messages()
            .times(1)
            .return_once(move |_, _| {
                cancel_on_fetch.cancel();
                Ok(messages)
            });

        let consumer = consumer_with(
            pull,
            Box::new(|msgs| {
                let count = msgs.len();
                async move { ProcessingResult::ack_all(count) }.boxed()
            }),
        );

        assert!(consumer.run(ctx).await.is_ok());
        for state in states {
            assert_eq!(*state.lock().unwrap(), Settled::Acked);
        }
    }

    #[tokio::test]
    async fn test_invalid_indices_are_ignored() {
        let (messages, states) = batch(1, false);
        let mut pull = MockPullConsumer::new();
        pull.expect_fetch_messages()
            .times(1)
            .return_once(move |_, _| Ok(messages));

        let consumer = consumer_with(
            pull,
            Box::new(|_| async { ProcessingResult::new(vec![0, 7], vec![(9, None)]) }.boxed()),
        );

        consumer.fetch_and_process_batch().await.unwrap();
        assert_eq!(*states[0].lock().unwrap(), Settled::Acked);
    }
}
