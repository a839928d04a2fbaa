//! Request counters
//!
//! - `iap_client_requests_total` (counter): label `status`
//! - `iap_client_unauthorized_retries_total` (counter): label `outcome`
//!   (`retried` or `refresh_failed`)

pub fn record_request(status: u16) {
    metrics::counter!("iap_client_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_retry(retried: bool) {
    let outcome = if retried { "retried" } else { "refresh_failed" };
    metrics::counter!("iap_client_unauthorized_retries_total", "outcome" => outcome).increment(1);
}
