use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register metric descriptions (can be called multiple times safely).
///
/// No exporter is installed; the host application decides where metrics go
/// by installing its own recorder.
pub fn describe_metrics() {
    describe_counter!(
        "querylens_queries_total",
        "Total number of SQL statements recorded into a unit of work"
    );
    describe_counter!(
        "querylens_n1_patterns_total",
        "Total number of N+1 query patterns detected"
    );
    describe_counter!(
        "querylens_payloads_total",
        "Total number of telemetry payloads by delivery outcome"
    );
    describe_histogram!(
        "querylens_payload_send_seconds",
        "Payload delivery duration in seconds"
    );
}

/// Record a captured query
pub fn record_query(unit_kind: &str) {
    counter!("querylens_queries_total", "unit" => unit_kind.to_string()).increment(1);
}

/// Record detected N+1 patterns
pub fn record_n1_patterns(unit_kind: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("querylens_n1_patterns_total", "unit" => unit_kind.to_string()).increment(count);
}

/// Record a payload delivery outcome (`sent`, `skipped`, or an error kind)
pub fn record_payload(status: &str) {
    counter!("querylens_payloads_total", "status" => status.to_string()).increment(1);
}

/// Record how long a delivery attempt took
pub fn record_send_duration(duration: Duration) {
    histogram!("querylens_payload_send_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        describe_metrics();

        record_query("http");
        record_n1_patterns("http", 2);
        record_n1_patterns("queue", 0);
        record_payload("sent");
        record_payload("transport_error");
        record_send_duration(Duration::from_millis(120));

        // Without a recorder these are no-ops; verify the calls don't panic
    }
}
