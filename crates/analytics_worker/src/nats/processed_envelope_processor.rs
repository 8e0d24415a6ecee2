use crate::domain::ProcessedEnvelopeService;
use common::domain::{DomainError, StoreEnvelopesInput};
use common::nats::{set_parent_from_message, BatchProcessor, InboundMessage, ProcessingResult};
use common::proto::decode_processed_envelope;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};

/// Batch processor for the processed-envelope stream.
///
/// All-or-nothing: the first message that fails to decode, or a failed store
/// write, naks the whole batch and reports a fatal error. Otherwise every
/// message is acked after the batch is written.
pub fn create_processed_envelope_processor(
    service: Arc<ProcessedEnvelopeService>,
) -> BatchProcessor {
    Box::new(move |messages: &[Box<dyn InboundMessage>]| {
        let service = service.clone();
        let count = messages.len();

        let span = info_span!("process_envelope_batch", message_count = count);
        if let Some(first) = messages.first() {
            let _guard = span.enter();
            set_parent_from_message(first.as_ref());
        }

        // Decode while the slice is still borrowed
        let decoded = messages
            .iter()
            .enumerate()
            .map(|(index, msg)| {
                decode_processed_envelope(msg.payload()).map_err(|e| {
                    error!(
                        message_index = index,
                        subject = %msg.subject(),
                        error = %format!("{:#}", e),
                        "Failed to decode processed envelope"
                    );
                    DomainError::DeserializationError(format!(
                        "message {} on {}: {:#}",
                        index,
                        msg.subject(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>();

        async move {
            let envelopes = match decoded {
                Ok(envelopes) => envelopes,
                Err(e) => return ProcessingResult::nak_all(count, e.into()),
            };

            match service.store_batch(StoreEnvelopesInput { envelopes }).await {
                Ok(()) => {
                    debug!(envelope_count = count, "Stored envelope batch");
                    ProcessingResult::ack_all(count)
                }
                Err(e) => {
                    error!(error = %e, "Failed to store envelope batch");
                    ProcessingResult::nak_all(count, e.into())
                }
            }
        }
        .instrument(span)
        .boxed()
    })
}
