//! EVM chain access
//!
//! [`ChainClient`] is the seam between the workflow and a chain: every read
//! and every signed submission goes through it. [`evm::EvmChainClient`] is the
//! alloy-backed implementation; tests substitute an in-memory one.

pub mod contracts;
pub mod evm;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::types::Chain;

/// Read/write access to one chain on behalf of one account.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Address transactions are signed with.
    fn sender(&self) -> Address;

    /// Legacy gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Nonce for the next transaction from `address`.
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Base fee of the latest block in wei.
    async fn base_fee(&self) -> Result<u128>;

    async fn max_priority_fee(&self) -> Result<u128>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Sign and broadcast. Returns the transaction hash.
    async fn send(&self, tx: TransactionRequest) -> Result<B256>;

    /// `None` while pending, `Some(success)` once included.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<bool>>;
}

/// An encoded call ready to be priced and submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub label: &'static str,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl ContractCall {
    pub fn new(label: &'static str, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            label,
            to,
            data: data.into(),
            value: U256::ZERO,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    fn request(&self, client: &dyn ChainClient, nonce: u64) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(client.sender())
            .with_to(self.to)
            .with_input(self.data.clone())
            .with_value(self.value)
            .with_nonce(nonce)
            .with_chain_id(client.chain().chain_id())
    }
}

/// Submit with a freshly read legacy gas price and estimated gas limit.
pub async fn submit_legacy(client: &dyn ChainClient, call: &ContractCall) -> Result<B256> {
    let nonce = client.transaction_count(client.sender()).await?;
    let gas_price = client.gas_price().await?;
    let mut tx = call.request(client, nonce).with_gas_price(gas_price);
    let gas_limit = client.estimate_gas(&tx).await?;
    tx = tx.with_gas_limit(gas_limit);

    debug!(
        chain = %client.chain(),
        call = call.label,
        nonce,
        gas_price,
        gas_limit,
        "Submitting transaction"
    );
    let hash = client.send(tx).await?;
    crate::metrics::record_tx_submitted(client.chain(), call.label);
    Ok(hash)
}

/// Priority fee is padded by 30% on top of the node suggestion.
pub fn padded_priority_fee(suggested: u128) -> u128 {
    suggested * 13 / 10
}

/// EIP-1559 fees: `(max_fee, max_priority_fee)`.
pub fn eip1559_fees(base_fee: u128, suggested_priority: u128) -> (u128, u128) {
    let priority = padded_priority_fee(suggested_priority);
    (base_fee + priority, priority)
}

/// Submit as an EIP-1559 transaction priced from the latest base fee.
pub async fn submit_eip1559(client: &dyn ChainClient, call: &ContractCall) -> Result<B256> {
    let nonce = client.transaction_count(client.sender()).await?;
    let base_fee = client.base_fee().await?;
    let suggested = client.max_priority_fee().await?;
    let (max_fee, priority) = eip1559_fees(base_fee, suggested);

    let mut tx = call
        .request(client, nonce)
        .with_max_fee_per_gas(max_fee)
        .with_max_priority_fee_per_gas(priority);
    let gas_limit = client.estimate_gas(&tx).await?;
    tx = tx.with_gas_limit(gas_limit);

    debug!(
        chain = %client.chain(),
        call = call.label,
        nonce,
        max_fee,
        priority,
        gas_limit,
        "Submitting EIP-1559 transaction"
    );
    let hash = client.send(tx).await?;
    crate::metrics::record_tx_submitted(client.chain(), call.label);
    Ok(hash)
}

pub fn format_tx_hash(hash: &B256) -> String {
    format!("0x{:x}", hash)
}

pub fn parse_tx_hash(raw: &str) -> Result<B256> {
    raw.parse::<B256>()
        .map_err(|e| eyre::eyre!("invalid transaction hash {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip1559_fee_padding() {
        let (max_fee, priority) = eip1559_fees(20_000_000_000, 1_000_000_000);
        assert_eq!(priority, 1_300_000_000);
        assert_eq!(max_fee, 21_300_000_000);
    }

    #[test]
    fn test_tx_hash_formatting() {
        let hash = B256::repeat_byte(0xab);
        let text = format_tx_hash(&hash);
        assert_eq!(text.len(), 66);
        assert_eq!(parse_tx_hash(&text).unwrap(), hash);
        assert!(parse_tx_hash("0x1234").is_err());
    }
}
