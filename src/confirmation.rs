//! Confirmation waiting
//!
//! Two bounded waits: an on-chain receipt wait for our own transactions, and a
//! generic poll over some external status (exchange withdrawal, Lombard
//! notarization, bridge settlement).

use alloy::primitives::B256;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chain::{format_tx_hash, ChainClient};
use crate::error::FlowError;

// ============================================================================
// Receipt wait
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReceiptWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReceiptWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl ReceiptWait {
    /// Wait until `tx_hash` is included and succeeded.
    ///
    /// A reverted transaction is [`FlowError::TxFailed`]; no receipt before the
    /// deadline is [`FlowError::ReceiptTimeout`].
    pub async fn wait(&self, client: &dyn ChainClient, tx_hash: B256) -> Result<(), FlowError> {
        let deadline = Instant::now() + self.timeout;
        let hash = format_tx_hash(&tx_hash);

        loop {
            match client.receipt(tx_hash).await {
                Ok(Some(true)) => {
                    info!(chain = %client.chain(), tx_hash = %hash, "Transaction confirmed");
                    return Ok(());
                }
                Ok(Some(false)) => {
                    warn!(chain = %client.chain(), tx_hash = %hash, "Transaction failed on-chain");
                    return Err(FlowError::TxFailed { tx_hash: hash });
                }
                Ok(None) => {
                    debug!(chain = %client.chain(), tx_hash = %hash, "Receipt not available yet");
                }
                Err(e) => {
                    warn!(chain = %client.chain(), tx_hash = %hash, error = %e, "Receipt lookup failed");
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(FlowError::ReceiptTimeout {
                    tx_hash: hash,
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ============================================================================
// External status poll
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PollInterval {
    Fixed(Duration),
    /// Uniformly random between the two bounds, re-drawn before every check.
    Jitter { min: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollSchedule {
    pub interval: PollInterval,
    pub max_checks: u32,
}

impl PollSchedule {
    pub fn fixed(interval: Duration, max_checks: u32) -> Self {
        Self {
            interval: PollInterval::Fixed(interval),
            max_checks,
        }
    }

    pub fn jitter(min: Duration, max: Duration, max_checks: u32) -> Self {
        Self {
            interval: PollInterval::Jitter { min, max },
            max_checks,
        }
    }

    pub fn next_delay(&self) -> Duration {
        match &self.interval {
            PollInterval::Fixed(d) => *d,
            PollInterval::Jitter { min, max } if max > min => {
                let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            PollInterval::Jitter { min, .. } => *min,
        }
    }
}

/// What one check of an external status found.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Not there yet; the string describes the observed state for logs.
    Pending(String),
    /// The source reports a terminal failure. Polling stops immediately.
    Failed(String),
}

/// Run `check` until it reports [`PollOutcome::Ready`], at most `max_checks` times.
///
/// Sleeps between checks, never after the last one. A check that errors
/// counts as a pending check. Exhaustion yields [`FlowError::PollTimeout`].
pub async fn poll_until<T, F, Fut>(
    what: &str,
    schedule: &PollSchedule,
    mut check: F,
) -> Result<T, FlowError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = eyre::Result<PollOutcome<T>>>,
{
    for attempt in 1..=schedule.max_checks {
        match check(attempt).await {
            Ok(PollOutcome::Ready(value)) => {
                info!(what, attempt, "Poll satisfied");
                return Ok(value);
            }
            Ok(PollOutcome::Failed(detail)) => {
                warn!(what, attempt, detail = %detail, "Poll reported terminal failure");
                return Err(FlowError::PollFailed {
                    what: what.to_string(),
                    detail,
                });
            }
            Ok(PollOutcome::Pending(state)) => {
                debug!(what, attempt, max = schedule.max_checks, state = %state, "Still pending");
            }
            Err(e) => {
                warn!(what, attempt, max = schedule.max_checks, error = %e, "Status check failed");
            }
        }

        if attempt < schedule.max_checks {
            let delay = schedule.next_delay();
            debug!(what, ?delay, "Waiting before next check");
            tokio::time::sleep(delay).await;
        }
    }

    crate::metrics::record_poll_timeout(what);
    Err(FlowError::PollTimeout {
        what: what.to_string(),
        checks: schedule.max_checks,
    })
}
