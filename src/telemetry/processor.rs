use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast;

use super::filter::AdmissionFilter;
use super::FilterError;
use crate::bus::{Envelope, Subscription, Topic};
use crate::models::TracesData;
use crate::signals::ShutdownSignal;

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Filtered batch published downstream
    Forwarded { spans: usize },
    /// Nothing left after filtering; not published
    Suppressed,
    /// Filtering failed; message dropped
    Failed,
}

impl MessageOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded { .. } => "forwarded",
            Self::Suppressed => "suppressed",
            Self::Failed => "failed",
        }
    }
}

/// Stream processor: `telemetry.inbound` → filter → `telemetry.outbound`
pub struct TelemetryProcessor {
    filter: AdmissionFilter,
    outbound: Topic<TracesData>,
}

impl TelemetryProcessor {
    pub fn new(filter: AdmissionFilter, outbound: Topic<TracesData>) -> Self {
        Self { filter, outbound }
    }

    /// Process one message. Failures stay local to the message.
    pub async fn process(&self, envelope: Envelope<TracesData>) -> MessageOutcome {
        let key = envelope.key;
        let attempt = AssertUnwindSafe(self.try_process(&key, envelope.payload))
            .catch_unwind()
            .await;
        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(
                    message_key = %key,
                    error = %e,
                    "Telemetry filtering failed, dropping message"
                );
                MessageOutcome::Failed
            }
            Err(panic) => {
                tracing::error!(
                    message_key = %key,
                    panic = ?panic,
                    "Telemetry filtering panicked, dropping message"
                );
                MessageOutcome::Failed
            }
        };
        crate::metrics::record_telemetry_message(outcome.as_str());
        outcome
    }

    async fn try_process(&self, key: &str, batch: TracesData) -> Result<MessageOutcome, FilterError> {
        let (filtered, stats) = self.filter.filter(batch).await?;
        crate::metrics::record_span_decisions(stats.admitted, stats.dropped);

        if !filtered.has_spans() {
            tracing::debug!(
                message_key = %key,
                dropped = stats.dropped,
                "No tracked spans left, suppressing message"
            );
            return Ok(MessageOutcome::Suppressed);
        }

        self.outbound.publish(key, filtered).await?;
        Ok(MessageOutcome::Forwarded {
            spans: stats.admitted,
        })
    }

    /// Consume until shutdown or until every publisher is gone
    pub async fn run(
        self,
        mut inbound: Subscription<TracesData>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        tracing::info!(
            inbound = inbound.name(),
            outbound = self.outbound.name(),
            "Telemetry admission filter started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                message = inbound.recv() => match message {
                    Some(envelope) => {
                        self.process(envelope).await;
                    }
                    None => break,
                },
            }
        }
    }
}
