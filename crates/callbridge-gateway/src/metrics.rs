//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Record a new call connecting.
pub fn record_call_connect() {
    metrics::gauge!("calls_active").increment(1.0);
    metrics::counter!("calls_total").increment(1);
}

/// Record a call disconnecting.
pub fn record_call_disconnect() {
    metrics::gauge!("calls_active").decrement(1.0);
}

/// Record a completed utterance dispatched to the decision engine.
pub fn record_utterance() {
    metrics::counter!("utterances_total").increment(1);
}

/// Record a synthesized reply spoken into a call.
pub fn record_reply(segments: usize) {
    metrics::counter!("replies_total").increment(1);
    metrics::counter!("reply_segments_total").increment(segments as u64);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_calls_do_not_panic() {
        // metrics crate uses a no-op recorder by default
        record_call_connect();
        record_call_disconnect();
        record_utterance();
        record_reply(3);
        record_error("test_error");
    }
}
