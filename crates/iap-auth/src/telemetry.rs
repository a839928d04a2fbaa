//! Credential lifecycle counters
//!
//! - `iap_auth_token_exchanges_total` (counter): label `outcome`
//! - `iap_auth_token_refreshes_total` (counter): label `outcome`
//!
//! Emitted through the `metrics` facade; without an installed recorder
//! these are no-ops.

/// Result of a token endpoint round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

pub fn record_exchange(outcome: Outcome) {
    metrics::counter!("iap_auth_token_exchanges_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_refresh(outcome: Outcome) {
    metrics::counter!("iap_auth_token_refreshes_total", "outcome" => outcome.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_exchange(Outcome::Success);
        record_refresh(Outcome::Failure);
    }

    #[test]
    fn counters_carry_outcome_label() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_exchange(Outcome::Success);
        record_refresh(Outcome::Success);
        record_refresh(Outcome::Failure);
        record_refresh(Outcome::Failure);

        let output = handle.render();
        assert!(output.contains("iap_auth_token_exchanges_total{outcome=\"success\"} 1"));
        assert!(output.contains("iap_auth_token_refreshes_total{outcome=\"success\"} 1"));
        assert!(output.contains("iap_auth_token_refreshes_total{outcome=\"failure\"} 2"));
    }
}
