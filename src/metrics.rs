//! Prometheus metrics for the LBTC operator
//!
//! The operator is a batch job, so instead of serving `/metrics` the registry
//! is rendered in text format to `METRICS_FILE` at the end of each run (for a
//! node_exporter textfile collector).

use eyre::{Result, WrapErr};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use std::time::Duration;

use crate::types::{AccountStatus, Chain};

lazy_static! {
    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "lbtc_operator_status_transitions_total",
        "Persisted account status transitions",
        &["to"]
    ).unwrap();

    pub static ref ACCOUNT_OUTCOMES: CounterVec = register_counter_vec!(
        "lbtc_operator_account_outcomes_total",
        "Per-run account results",
        &["outcome", "error"]
    ).unwrap();

    pub static ref TRANSACTIONS_SUBMITTED: CounterVec = register_counter_vec!(
        "lbtc_operator_transactions_submitted_total",
        "Transactions broadcast",
        &["chain", "call"]
    ).unwrap();

    pub static ref WITHDRAWALS_REQUESTED: CounterVec = register_counter_vec!(
        "lbtc_operator_withdrawals_requested_total",
        "Exchange withdrawals requested",
        &["exchange", "currency"]
    ).unwrap();

    pub static ref POLL_TIMEOUTS: CounterVec = register_counter_vec!(
        "lbtc_operator_poll_timeouts_total",
        "External status polls that ran out of checks",
        &["what"]
    ).unwrap();

    pub static ref GAS_GATE_WAIT: HistogramVec = register_histogram_vec!(
        "lbtc_operator_gas_gate_wait_seconds",
        "Time spent waiting for gas price to drop under the ceiling",
        &["chain"],
        vec![0.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 10800.0, 21600.0]
    ).unwrap();
}

pub fn record_transition(to: AccountStatus) {
    STATUS_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
}

/// `error` is empty for successful accounts.
pub fn record_account_outcome(outcome: &str, error: &str) {
    ACCOUNT_OUTCOMES.with_label_values(&[outcome, error]).inc();
}

pub fn record_tx_submitted(chain: Chain, call: &str) {
    TRANSACTIONS_SUBMITTED
        .with_label_values(&[chain.as_str(), call])
        .inc();
}

pub fn record_withdrawal(exchange: &str, currency: &str) {
    WITHDRAWALS_REQUESTED
        .with_label_values(&[exchange, currency])
        .inc();
}

pub fn record_poll_timeout(what: &str) {
    POLL_TIMEOUTS.with_label_values(&[what]).inc();
}

pub fn observe_gas_wait(chain: Chain, waited: Duration) {
    GAS_GATE_WAIT
        .with_label_values(&[chain.as_str()])
        .observe(waited.as_secs_f64());
}

/// Render the default registry in Prometheus text format.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .wrap_err("Failed to encode metrics")?;
    String::from_utf8(buffer).wrap_err("Metrics output is not UTF-8")
}

/// Write the rendered registry to `path`, replacing it atomically.
pub async fn write_textfile(path: &Path) -> Result<()> {
    let body = render()?;
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .wrap_err_with(|| format!("Failed to move metrics into {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_series() {
        record_transition(AccountStatus::Minting);
        record_tx_submitted(Chain::Ethereum, "lbtc_mint");
        let text = render().unwrap();
        assert!(text.contains("lbtc_operator_status_transitions_total"));
        assert!(text.contains("to=\"MINTING\""));
        assert!(text.contains("call=\"lbtc_mint\""));
    }

    #[tokio::test]
    async fn test_write_textfile() {
        record_poll_timeout("lombard deposit");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbtc.prom");
        write_textfile(&path).await.unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("lbtc_operator_poll_timeouts_total"));
    }
}
