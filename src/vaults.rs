//! Restake vault strategies
//!
//! The orchestrator only knows a vault by the name selected in the accounts
//! file. Each strategy turns "put this much LBTC in" into an approve call and
//! a deposit call; submission is left to the caller.

use alloy::primitives::{address, Address, U256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::chain::contracts::{approve_call, vault_deposit_call};
use crate::chain::ContractCall;
use crate::error::FlowError;

pub trait VaultStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allowance the vault needs on `token`.
    fn approve(&self, token: Address, amount: U256) -> ContractCall;

    fn deposit(&self, token: Address, amount: U256) -> ContractCall;
}

/// LBTC DeFi vault: allowance goes to the vault, deposit goes through its teller.
pub struct DefiVault {
    pub vault: Address,
    pub teller: Address,
}

impl DefiVault {
    pub const NAME: &'static str = "defi_vault";

    pub fn mainnet() -> Self {
        Self {
            vault: address!("5401b8620e5fb570064ca9114fd1e135fd77d57c"),
            teller: address!("2ea43384f1a98765257bc6cb26c7131debdeb9b3"),
        }
    }
}

impl VaultStrategy for DefiVault {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn approve(&self, token: Address, amount: U256) -> ContractCall {
        approve_call(token, self.vault, amount)
    }

    fn deposit(&self, token: Address, amount: U256) -> ContractCall {
        vault_deposit_call(self.teller, token, amount)
    }
}

/// Named strategies available for selection.
#[derive(Clone, Default)]
pub struct VaultRegistry {
    strategies: BTreeMap<String, Arc<dyn VaultStrategy>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every vault the operator supports out of the box.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DefiVault::mainnet()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn VaultStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn VaultStrategy>, FlowError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnsupportedVault(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::contracts::LBTC_ADDRESS;

    #[test]
    fn test_defaults_register_defi_vault() {
        let registry = VaultRegistry::with_defaults();
        assert!(registry.contains("defi_vault"));
        assert_eq!(registry.names(), vec!["defi_vault"]);
        assert!(matches!(
            registry.get("mystery_vault"),
            Err(FlowError::UnsupportedVault(name)) if name == "mystery_vault"
        ));
    }

    #[test]
    fn test_defi_vault_calls() {
        let vault = DefiVault::mainnet();
        let amount = U256::from(150_000u64);
        let approve = vault.approve(LBTC_ADDRESS, amount);
        assert_eq!(approve.to, LBTC_ADDRESS);
        let deposit = vault.deposit(LBTC_ADDRESS, amount);
        assert_eq!(deposit.to, vault.teller);
        assert_ne!(approve.data, deposit.data);
    }
}
