//! Account entity
//!
//! An [`Account`] pairs the immutable, validated [`AccountSettings`] read from
//! the accounts file with the mutable [`AccountRecord`] that is persisted after
//! every transition. The record is the only source of truth for progress.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlowError;
use crate::redact::{mask_proxy, Secret};
use crate::types::{AccountStatus, Chain, ExchangeKind};

// ============================================================================
// Settings
// ============================================================================

/// Exchange API credentials for one account.
#[derive(Clone)]
pub struct ExchangeCredentials {
    pub kind: ExchangeKind,
    pub api_key: String,
    pub secret: Secret,
    pub passphrase: Secret,
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("secret", &self.secret)
            .field("passphrase", &self.passphrase)
            .finish()
    }
}

/// Where the BTC deposit address comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositAddressSource {
    /// Generate one through the deposit service (captcha gated).
    Generate,
    /// Use an address the operator already registered.
    Existing(String),
}

/// Validated per-account configuration. Never mutated after load.
#[derive(Clone)]
pub struct AccountSettings {
    pub signer: PrivateKeySigner,
    pub proxy: Option<String>,
    /// Gas price ceiling in gwei; `None` disables the gate.
    pub max_gas_gwei: Option<u64>,
    pub exchange: ExchangeCredentials,
    pub deposit_address: DepositAddressSource,
    pub min_btc_sats: u64,
    pub max_btc_sats: u64,
    /// Vault to restake into; `None` means no restake.
    pub vault: Option<String>,
}

impl AccountSettings {
    pub fn identity(&self) -> Address {
        self.signer.address()
    }
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("identity", &self.identity())
            .field("private_key", &"<redacted>")
            .field("proxy", &self.proxy.as_deref().map(mask_proxy))
            .field("max_gas_gwei", &self.max_gas_gwei)
            .field("exchange", &self.exchange)
            .field("deposit_address", &self.deposit_address)
            .field("min_btc_sats", &self.min_btc_sats)
            .field("max_btc_sats", &self.max_btc_sats)
            .field("vault", &self.vault)
            .finish()
    }
}

// ============================================================================
// Persisted record
// ============================================================================

/// Write-once identifiers recorded on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DerivedAddress,
    WithdrawalId,
    GasWithdrawalId,
    TxHashBridge,
    BridgeCheckEndpoint,
    TxHashMint,
    TxHashApprove,
    TxHashRestake,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::DerivedAddress => "derived_address",
            Field::WithdrawalId => "withdrawal_id",
            Field::GasWithdrawalId => "gas_withdrawal_id",
            Field::TxHashBridge => "tx_hash_bridge",
            Field::BridgeCheckEndpoint => "bridge_check_endpoint",
            Field::TxHashMint => "tx_hash_mint",
            Field::TxHashApprove => "tx_hash_approve",
            Field::TxHashRestake => "tx_hash_restake",
        }
    }
}

/// Progress of one account as stored by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_withdrawal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_source_chain: Option<Chain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash_bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_check_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash_mint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash_approve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash_restake: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            status: AccountStatus::Init,
            derived_address: None,
            withdrawal_id: None,
            gas_withdrawal_id: None,
            gas_source_chain: None,
            tx_hash_bridge: None,
            bridge_check_endpoint: None,
            tx_hash_mint: None,
            tx_hash_approve: None,
            tx_hash_restake: None,
            updated_at: Utc::now(),
        }
    }
}

impl AccountRecord {
    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::DerivedAddress => &self.derived_address,
            Field::WithdrawalId => &self.withdrawal_id,
            Field::GasWithdrawalId => &self.gas_withdrawal_id,
            Field::TxHashBridge => &self.tx_hash_bridge,
            Field::BridgeCheckEndpoint => &self.bridge_check_endpoint,
            Field::TxHashMint => &self.tx_hash_mint,
            Field::TxHashApprove => &self.tx_hash_approve,
            Field::TxHashRestake => &self.tx_hash_restake,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::DerivedAddress => &mut self.derived_address,
            Field::WithdrawalId => &mut self.withdrawal_id,
            Field::GasWithdrawalId => &mut self.gas_withdrawal_id,
            Field::TxHashBridge => &mut self.tx_hash_bridge,
            Field::BridgeCheckEndpoint => &mut self.bridge_check_endpoint,
            Field::TxHashMint => &mut self.tx_hash_mint,
            Field::TxHashApprove => &mut self.tx_hash_approve,
            Field::TxHashRestake => &mut self.tx_hash_restake,
        }
    }
}

// ============================================================================
// Account
// ============================================================================

#[derive(Debug, Clone)]
pub struct Account {
    pub identity: Address,
    pub settings: AccountSettings,
    record: AccountRecord,
}

impl Account {
    /// Attach settings to a persisted record, or start from `INIT`.
    pub fn new(settings: AccountSettings, record: Option<AccountRecord>) -> Self {
        Self {
            identity: settings.identity(),
            settings,
            record: record.unwrap_or_default(),
        }
    }

    pub fn status(&self) -> AccountStatus {
        self.record.status
    }

    pub fn record(&self) -> &AccountRecord {
        &self.record
    }

    /// Move to `next`, refusing anything outside the transition table.
    pub fn advance(&mut self, next: AccountStatus) -> Result<(), FlowError> {
        let from = self.record.status;
        if !from.can_advance_to(next) {
            return Err(FlowError::IllegalTransition { from, to: next });
        }
        self.record.status = next;
        self.record.updated_at = Utc::now();
        Ok(())
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.record.slot(field).as_deref()
    }

    /// Fetch a value an earlier step should have recorded.
    pub fn require(&self, field: Field) -> Result<&str, FlowError> {
        self.get(field).ok_or(FlowError::MissingField {
            status: self.record.status,
            field: field.name(),
        })
    }

    /// Record `value` unless the field already holds it.
    ///
    /// A different existing value is an error; identifiers are written once.
    pub fn set(&mut self, field: Field, value: impl Into<String>) -> Result<(), FlowError> {
        let value = value.into();
        let slot = self.record.slot_mut(field);
        match slot {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(FlowError::WriteOnce {
                field: field.name(),
                existing: existing.clone(),
                attempted: value,
            }),
            None => {
                *slot = Some(value);
                self.record.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    pub fn gas_source_chain(&self) -> Option<Chain> {
        self.record.gas_source_chain
    }

    pub fn set_gas_source_chain(&mut self, chain: Chain) -> Result<(), FlowError> {
        match self.record.gas_source_chain {
            Some(existing) if existing == chain => Ok(()),
            Some(existing) => Err(FlowError::WriteOnce {
                field: "gas_source_chain",
                existing: existing.to_string(),
                attempted: chain.to_string(),
            }),
            None => {
                self.record.gas_source_chain = Some(chain);
                self.record.updated_at = Utc::now();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AccountSettings {
        AccountSettings {
            signer: PrivateKeySigner::random(),
            proxy: Some("user:pass@127.0.0.1:8080".into()),
            max_gas_gwei: Some(20),
            exchange: ExchangeCredentials {
                kind: ExchangeKind::Okx,
                api_key: "key".into(),
                secret: Secret::new("api-secret"),
                passphrase: Secret::new("api-pass"),
            },
            deposit_address: DepositAddressSource::Generate,
            min_btc_sats: 100_000,
            max_btc_sats: 200_000,
            vault: None,
        }
    }

    #[test]
    fn test_new_account_starts_at_init() {
        let account = Account::new(settings(), None);
        assert_eq!(account.status(), AccountStatus::Init);
        assert_eq!(account.identity, account.settings.identity());
    }

    #[test]
    fn test_advance_rejects_skips_and_regressions() {
        let mut account = Account::new(settings(), None);
        account.advance(AccountStatus::AddressGenerated).unwrap();
        assert!(matches!(
            account.advance(AccountStatus::Minting),
            Err(FlowError::IllegalTransition { .. })
        ));
        assert!(account.advance(AccountStatus::Init).is_err());
        assert_eq!(account.status(), AccountStatus::AddressGenerated);
    }

    #[test]
    fn test_fields_are_write_once() {
        let mut account = Account::new(settings(), None);
        account.set(Field::DerivedAddress, "bc1qexample").unwrap();
        account.set(Field::DerivedAddress, "bc1qexample").unwrap();
        let err = account.set(Field::DerivedAddress, "bc1qother").unwrap_err();
        assert!(matches!(err, FlowError::WriteOnce { field: "derived_address", .. }));
        assert_eq!(account.get(Field::DerivedAddress), Some("bc1qexample"));
    }

    #[test]
    fn test_require_reports_missing_field() {
        let account = Account::new(settings(), None);
        let err = account.require(Field::TxHashMint).unwrap_err();
        assert!(err.to_string().contains("tx_hash_mint"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let out = format!("{:?}", settings());
        assert!(!out.contains("api-secret"));
        assert!(!out.contains("api-pass"));
        assert!(!out.contains("user:pass"));
    }

    #[test]
    fn test_record_json_omits_unset_fields() {
        let record = AccountRecord::default();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "INIT");
        assert!(json.get("tx_hash_mint").is_none());

        let parsed: AccountRecord =
            serde_json::from_str(r#"{"status":"MINTING","tx_hash_mint":"0xabc"}"#).unwrap();
        assert_eq!(parsed.status, AccountStatus::Minting);
        assert_eq!(parsed.tx_hash_mint.as_deref(), Some("0xabc"));
    }
}
