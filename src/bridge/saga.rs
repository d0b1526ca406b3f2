//! One bridge run: config, quote, gated EIP-1559 submission, settlement.
//!
//! Split in two halves so the caller can persist the source transaction hash
//! between them: [`BridgeSaga::submit`] broadcasts, [`BridgeSaga::settle`]
//! waits for the receipt and the aggregator's settlement report.

use alloy::primitives::B256;
use std::time::Duration;
use tracing::{info, warn};

use super::{BridgeAggregator, BridgeConfig, BridgeStatus};
use crate::chain::{format_tx_hash, submit_eip1559, ChainClient, ContractCall};
use crate::confirmation::{poll_until, PollOutcome, PollSchedule, ReceiptWait};
use crate::error::FlowError;
use crate::gas::GasGate;
use crate::retry::RetryPolicy;
use crate::types::{display_eth, Chain};

#[derive(Debug, Clone)]
pub struct BridgeSchedule {
    /// Config fetches allowed while the amount exceeds solver capacity.
    pub capacity_attempts: u32,
    /// Jitter between those fetches.
    pub capacity_backoff: RetryPolicy,
    pub status: PollSchedule,
}

impl Default for BridgeSchedule {
    fn default() -> Self {
        Self {
            capacity_attempts: 5,
            capacity_backoff: RetryPolicy::default(),
            status: PollSchedule::jitter(Duration::from_secs(30), Duration::from_secs(120), 6),
        }
    }
}

/// What [`BridgeSaga::submit`] hands back for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBridge {
    pub tx_hash: B256,
    pub check_endpoint: String,
    pub time_estimate: Duration,
}

pub struct BridgeSaga<'a> {
    pub aggregator: &'a dyn BridgeAggregator,
    pub source: &'a dyn ChainClient,
    pub destination: Chain,
    pub gate: &'a GasGate,
    pub receipts: &'a ReceiptWait,
    pub schedule: &'a BridgeSchedule,
    pub max_gas_gwei: Option<u64>,
}

impl<'a> BridgeSaga<'a> {
    fn origin(&self) -> Chain {
        self.source.chain()
    }

    /// Fetch config until the user's amount fits in one solver request.
    async fn usable_config(&self) -> Result<BridgeConfig, FlowError> {
        let user = self.source.sender();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let config = self
                .aggregator
                .config(self.origin(), self.destination, user)
                .await?;

            if !config.enabled {
                return Err(FlowError::BridgeDisabled {
                    origin: self.origin().to_string(),
                });
            }
            if config.user_max_amount <= config.solver_capacity {
                return Ok(config);
            }
            if attempt >= self.schedule.capacity_attempts {
                return Err(FlowError::BridgeCapacity {
                    amount: config.user_max_amount.to_string(),
                    capacity: config.solver_capacity.to_string(),
                    attempts: attempt,
                });
            }

            let backoff = self.schedule.capacity_backoff.jittered_delay();
            warn!(
                origin = %self.origin(),
                amount = %config.user_max_amount,
                capacity = %config.solver_capacity,
                attempt,
                ?backoff,
                "Bridge amount above solver capacity, refetching config"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Broadcast the source-chain transaction.
    pub async fn submit(&self) -> Result<SubmittedBridge, FlowError> {
        let config = self.usable_config().await?;
        let amount = config.user_max_amount;

        let quote = self
            .aggregator
            .quote(self.origin(), self.destination, self.source.sender(), amount)
            .await?
            .ok_or_else(|| {
                FlowError::NoQuote(format!("{} -> {} for {}", self.origin(), self.destination, amount))
            })?;

        info!(
            origin = %self.origin(),
            destination = %self.destination,
            amount_eth = %display_eth(amount),
            "Bridging gas"
        );

        self.gate
            .await_acceptable_price(self.source, self.max_gas_gwei)
            .await?;

        let call = ContractCall::new("bridge_deposit", quote.to, quote.data.clone()).with_value(quote.value);
        let tx_hash = submit_eip1559(self.source, &call).await?;
        info!(origin = %self.origin(), tx_hash = %format_tx_hash(&tx_hash), "Bridge transaction sent");

        Ok(SubmittedBridge {
            tx_hash,
            check_endpoint: quote.check_endpoint,
            time_estimate: quote.time_estimate,
        })
    }

    /// Wait for the source receipt, then for the aggregator to report success.
    ///
    /// `time_estimate` is slept once before polling; pass `None` on resume.
    pub async fn settle(
        &self,
        tx_hash: B256,
        check_endpoint: &str,
        time_estimate: Option<Duration>,
    ) -> Result<(), FlowError> {
        self.receipts.wait(self.source, tx_hash).await?;

        if let Some(estimate) = time_estimate.filter(|d| !d.is_zero()) {
            info!(secs = estimate.as_secs(), "Waiting for bridge time estimate");
            tokio::time::sleep(estimate).await;
        }

        let aggregator = self.aggregator;
        let outcome = poll_until("bridge settlement", &self.schedule.status, |_| async move {
            Ok(match aggregator.status(check_endpoint).await? {
                BridgeStatus::Pending(state) => PollOutcome::Pending(state),
                terminal => PollOutcome::Ready(terminal),
            })
        })
        .await?;

        match outcome {
            BridgeStatus::Success => {}
            BridgeStatus::Failure(detail) => {
                return Err(FlowError::BridgeFailed {
                    status: "failure".into(),
                    detail,
                })
            }
            BridgeStatus::Refund(detail) => {
                return Err(FlowError::BridgeFailed {
                    status: "refund".into(),
                    detail,
                })
            }
            BridgeStatus::Pending(state) => {
                return Err(FlowError::BridgeFailed {
                    status: state,
                    detail: "poll ended on a pending status".into(),
                })
            }
        }

        info!(tx_hash = %format_tx_hash(&tx_hash), "Bridge settled");
        Ok(())
    }

    /// Submit and settle in one go. Returns the source transaction hash.
    pub async fn run(&self) -> Result<B256, FlowError> {
        let submitted = self.submit().await?;
        self.settle(
            submitted.tx_hash,
            &submitted.check_endpoint,
            Some(submitted.time_estimate),
        )
        .await?;
        Ok(submitted.tx_hash)
    }
}
