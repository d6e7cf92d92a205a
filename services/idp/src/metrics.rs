//! Prometheus metrics exposition
//!
//! Metrics emitted by the auth layer:
//!
//! - `resource_requests_total` (counter): labels `resource`, `outcome`
//! - `resource_request_duration_seconds` (histogram): label `outcome`
//! - `auth_failures_total` (counter): labels `scheme`, `reason`
//! - `avatar_lookup_failures_total` (counter): label `service`

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Configures `resource_request_duration_seconds` with explicit buckets
/// so it renders as a histogram (`_bucket` lines usable with
/// `histogram_quantile()`) rather than the default summary. Dispatch is
/// fast; the long tail comes from handlers doing their own IO.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "resource_request_duration_seconds".to_string(),
            ),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a dispatched resource call with its payload outcome.
pub fn record_resource_request(resource: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!("resource_requests_total", "resource" => resource.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!("resource_request_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record an authentication failure by scheme (`bearer`/`basic`) and
/// reason label.
pub fn record_auth_failure(scheme: &str, reason: &str) {
    metrics::counter!("auth_failures_total", "scheme" => scheme.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record a failed third-party avatar lookup.
pub fn record_avatar_lookup_failure(service: &str) {
    metrics::counter!("avatar_lookup_failures_total", "service" => service.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // When no recorder is installed, metrics calls are no-ops.
        record_resource_request("profile", "ok", 0.002);
        record_auth_failure("bearer", "token_unknown");
        record_avatar_lookup_failure("github");
    }

    /// Create an isolated recorder/handle pair for unit tests.
    /// build_recorder() avoids the global-recorder singleton constraint,
    /// which would make install_recorder() panic on a second call.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "resource_request_duration_seconds".to_string(),
                ),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn resource_requests_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_resource_request("profile", "ok", 0.002);
        record_resource_request("contacts", "handler_error", 0.1);

        let output = handle.render();
        assert!(output.contains("resource_requests_total"));
        assert!(output.contains("resource=\"profile\""));
        assert!(output.contains("outcome=\"ok\""));
        assert!(output.contains("resource=\"contacts\""));
        assert!(output.contains("outcome=\"handler_error\""));
        assert!(
            output.contains("resource_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
    }

    #[test]
    fn auth_failures_render_with_scheme_and_reason() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_auth_failure("bearer", "scope_missing");
        record_auth_failure("basic", "client_credentials_invalid");

        let output = handle.render();
        assert!(output.contains("auth_failures_total"));
        assert!(output.contains("scheme=\"bearer\""));
        assert!(output.contains("reason=\"scope_missing\""));
        assert!(output.contains("scheme=\"basic\""));
        assert!(output.contains("reason=\"client_credentials_invalid\""));
    }

    #[test]
    fn avatar_failures_render_with_service_label() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_avatar_lookup_failure("twitter");

        let output = handle.render();
        assert!(output.contains("avatar_lookup_failures_total"));
        assert!(output.contains("service=\"twitter\""));
    }
}
