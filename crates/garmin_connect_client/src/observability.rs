//! Counters emitted through the `metrics` facade. Nothing is recorded unless
//! the embedding application installs a recorder.

use metrics::counter;

pub fn record_request(api: &'static str) {
    counter!("garmin_requests_total", "api" => api).increment(1);
}

pub fn record_request_failure(status: Option<u16>) {
    let status = status.map_or_else(|| "transport".to_string(), |s| s.to_string());
    counter!("garmin_request_failures_total", "status" => status).increment(1);
}

pub fn record_reauth(success: bool) {
    counter!("garmin_reauth_total", "outcome" => outcome(success)).increment(1);
}

pub fn record_auth_strategy(strategy: &'static str, success: bool) {
    counter!(
        "garmin_auth_strategy_total",
        "strategy" => strategy,
        "outcome" => outcome(success)
    )
    .increment(1);
}

fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}
