pub mod clickhouse;
pub mod domain;
pub mod garde;
pub mod nats;
pub mod proto;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEndDeviceDataRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEndDeviceRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockProcessedEnvelopeProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockProcessedEnvelopeRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
