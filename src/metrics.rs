use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

fn init_metric_descriptions() {
    describe_counter!(
        "quality_gate_telemetry_messages_total",
        "Telemetry messages seen by the admission filter, by outcome"
    );
    describe_counter!(
        "quality_gate_telemetry_spans_total",
        "Spans seen by the admission filter, by decision"
    );
    describe_counter!(
        "quality_gate_spans_ingested_total",
        "Admitted spans written to the telemetry store"
    );
    describe_counter!(
        "quality_gate_coverage_requests_total",
        "Coverage requests scored, by outcome"
    );
    describe_histogram!(
        "quality_gate_criterion_duration_seconds",
        "Time spent computing one coverage criterion"
    );
    describe_counter!(
        "quality_gate_reports_total",
        "Report lifecycle events"
    );
    describe_counter!(
        "quality_gate_outbox_published_total",
        "Coverage requests relayed from the outbox"
    );
    describe_gauge!(
        "quality_gate_info",
        "Service version information"
    );

    gauge!("quality_gate_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record the outcome of one inbound telemetry message
pub fn record_telemetry_message(outcome: &str) {
    counter!(
        "quality_gate_telemetry_messages_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

/// Record admitted and dropped span counts for one message
pub fn record_span_decisions(admitted: usize, dropped: usize) {
    counter!("quality_gate_telemetry_spans_total", "decision" => "admitted")
        .increment(admitted as u64);
    counter!("quality_gate_telemetry_spans_total", "decision" => "dropped")
        .increment(dropped as u64);
}

pub fn record_spans_ingested(count: usize) {
    counter!("quality_gate_spans_ingested_total").increment(count as u64);
}

pub fn record_coverage_request(outcome: &str) {
    counter!(
        "quality_gate_coverage_requests_total",
        "outcome" => outcome.to_string(),
    )
    .increment(1);
}

pub fn record_criterion_duration(criterion: &str, duration: Duration) {
    histogram!(
        "quality_gate_criterion_duration_seconds",
        "criterion" => criterion.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a report lifecycle event (`created`, `completed`, `timed_out`)
pub fn record_report_event(event: &str) {
    counter!(
        "quality_gate_reports_total",
        "event" => event.to_string(),
    )
    .increment(1);
}

pub fn record_outbox_published(count: usize) {
    counter!("quality_gate_outbox_published_total").increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        init_metric_descriptions();

        record_telemetry_message("forwarded");
        record_span_decisions(3, 1);
        record_spans_ingested(3);
        record_coverage_request("success");
        record_criterion_duration("PATH_COVERAGE", Duration::from_millis(4));
        record_report_event("created");
        record_outbox_published(2);

        // Without a recorder installed these are no-ops; they must not panic
    }
}
