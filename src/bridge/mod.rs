//! Cross-chain gas bridging
//!
//! Moves ETH from a secondary chain to Ethereum through a bridge aggregator so
//! the account can pay for the mint. [`relay::RelayClient`] talks to the Relay
//! API; [`saga::BridgeSaga`] drives one bridge from config to settlement.

pub mod relay;
pub mod saga;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use eyre::Result;
use std::time::Duration;

use crate::types::Chain;

pub use relay::RelayClient;
pub use saga::{BridgeSaga, BridgeSchedule, SubmittedBridge};

/// Route configuration for one user and chain pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub enabled: bool,
    /// Largest amount the user can bridge right now (their balance minus fees).
    pub user_max_amount: U256,
    /// Largest amount the solver fills in a single request.
    pub solver_capacity: U256,
}

/// Source-chain transaction to execute plus how to follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeQuote {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Path (relative to the aggregator base URL) reporting settlement status.
    pub check_endpoint: String,
    pub time_estimate: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    Success,
    Failure(String),
    Refund(String),
    Pending(String),
}

#[async_trait]
pub trait BridgeAggregator: Send + Sync {
    async fn config(&self, origin: Chain, destination: Chain, user: Address) -> Result<BridgeConfig>;

    /// `None` when no route can fill the amount.
    async fn quote(
        &self,
        origin: Chain,
        destination: Chain,
        user: Address,
        amount: U256,
    ) -> Result<Option<BridgeQuote>>;

    async fn status(&self, check_endpoint: &str) -> Result<BridgeStatus>;
}
