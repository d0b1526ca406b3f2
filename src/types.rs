//! Common types for the account workflow
//!
//! The closed status set and its transition table, the EVM chains the
//! operator touches, and the exchange-side currency/network vocabulary.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Account status
// ============================================================================

/// Workflow position of an account.
///
/// Persisted as the SCREAMING_SNAKE string returned by [`AccountStatus::as_str`].
/// Parsing rejects anything outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccountStatus {
    Init,
    AddressGeneratedWaiting,
    AddressGenerated,
    DepositInitiated,
    DepositConfirmationsPending,
    CheckingL1Balance,
    CheckingL2Balance,
    WithdrawingGasFromExchange,
    WithdrawConfirmation,
    Bridging,
    ConfirmationsPending,
    Minting,
    MintConfirmation,
    Restaking,
    RestakeConfirmation,
    Completed,
}

impl AccountStatus {
    pub const ALL: [AccountStatus; 16] = [
        AccountStatus::Init,
        AccountStatus::AddressGeneratedWaiting,
        AccountStatus::AddressGenerated,
        AccountStatus::DepositInitiated,
        AccountStatus::DepositConfirmationsPending,
        AccountStatus::CheckingL1Balance,
        AccountStatus::CheckingL2Balance,
        AccountStatus::WithdrawingGasFromExchange,
        AccountStatus::WithdrawConfirmation,
        AccountStatus::Bridging,
        AccountStatus::ConfirmationsPending,
        AccountStatus::Minting,
        AccountStatus::MintConfirmation,
        AccountStatus::Restaking,
        AccountStatus::RestakeConfirmation,
        AccountStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Init => "INIT",
            AccountStatus::AddressGeneratedWaiting => "ADDRESS_GENERATED_WAITING",
            AccountStatus::AddressGenerated => "ADDRESS_GENERATED",
            AccountStatus::DepositInitiated => "DEPOSIT_INITIATED",
            AccountStatus::DepositConfirmationsPending => "DEPOSIT_CONFIRMATIONS_PENDING",
            AccountStatus::CheckingL1Balance => "CHECKING_L1_BALANCE",
            AccountStatus::CheckingL2Balance => "CHECKING_L2_BALANCE",
            AccountStatus::WithdrawingGasFromExchange => "WITHDRAWING_GAS_FROM_EXCHANGE",
            AccountStatus::WithdrawConfirmation => "WITHDRAW_CONFIRMATION",
            AccountStatus::Bridging => "BRIDGING",
            AccountStatus::ConfirmationsPending => "CONFIRMATIONS_PENDING",
            AccountStatus::Minting => "MINTING",
            AccountStatus::MintConfirmation => "MINT_CONFIRMATION",
            AccountStatus::Restaking => "RESTAKING",
            AccountStatus::RestakeConfirmation => "RESTAKE_CONFIRMATION",
            AccountStatus::Completed => "COMPLETED",
        }
    }

    /// The canonical transition table. Every status change goes through here.
    pub fn successors(&self) -> &'static [AccountStatus] {
        use AccountStatus::*;
        match self {
            Init => &[AddressGeneratedWaiting, AddressGenerated],
            AddressGeneratedWaiting => &[AddressGenerated],
            AddressGenerated => &[DepositInitiated],
            DepositInitiated => &[DepositConfirmationsPending],
            DepositConfirmationsPending => &[CheckingL1Balance],
            CheckingL1Balance => &[ConfirmationsPending, CheckingL2Balance],
            CheckingL2Balance => &[Bridging, WithdrawingGasFromExchange],
            WithdrawingGasFromExchange => &[WithdrawConfirmation],
            WithdrawConfirmation => &[Bridging],
            Bridging => &[ConfirmationsPending],
            ConfirmationsPending => &[Minting],
            Minting => &[MintConfirmation],
            MintConfirmation => &[Restaking, Completed],
            Restaking => &[RestakeConfirmation],
            RestakeConfirmation => &[Completed],
            Completed => &[],
        }
    }

    pub fn can_advance_to(&self, next: AccountStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccountStatus::Completed)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown account status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for AccountStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for AccountStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountStatus> for String {
    fn from(status: AccountStatus) -> Self {
        status.as_str().to_string()
    }
}

// ============================================================================
// Chains
// ============================================================================

/// EVM chains the operator reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Optimism,
    Base,
    Arbitrum,
}

impl Chain {
    /// Secondary chains in the order they are checked for spare gas.
    pub const SECONDARY_PRIORITY: [Chain; 3] = [Chain::Optimism, Chain::Base, Chain::Arbitrum];

    /// Chains the exchange can send ETH to for gas.
    pub const GAS_WITHDRAWAL_TARGETS: [Chain; 2] = [Chain::Optimism, Chain::Base];

    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Optimism => 10,
            Chain::Base => 8453,
            Chain::Arbitrum => 42161,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
        }
    }

    /// Environment variable holding the RPC endpoint(s) for this chain.
    pub fn rpc_env(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETH_RPC_URL",
            Chain::Optimism => "OP_RPC_URL",
            Chain::Base => "BASE_RPC_URL",
            Chain::Arbitrum => "ARBITRUM_RPC_URL",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Exchange vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    #[serde(rename = "OKX")]
    Okx,
    #[serde(rename = "Bitget")]
    Bitget,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Okx => "OKX",
            ExchangeKind::Bitget => "Bitget",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OKX" => Ok(ExchangeKind::Okx),
            "Bitget" => Ok(ExchangeKind::Bitget),
            other => Err(format!("must be OKX or Bitget, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Btc,
    Eth,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
        }
    }
}

/// Network an exchange withdrawal is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawNetwork {
    Bitcoin,
    Evm(Chain),
}

impl fmt::Display for WithdrawNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawNetwork::Bitcoin => write!(f, "bitcoin"),
            WithdrawNetwork::Evm(chain) => write!(f, "{chain}"),
        }
    }
}

// ============================================================================
// Amounts
// ============================================================================

pub const SATS_PER_BTC: u64 = 100_000_000;
pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Render satoshis as a BTC decimal string with 8 fractional digits.
pub fn format_btc(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Render an ETH amount expressed in ten-thousandths (4 decimals).
pub fn format_eth_4dp(units: u64) -> String {
    format!("{}.{:04}", units / 10_000, units % 10_000)
}

/// Convert ETH ten-thousandths to wei.
pub fn eth_4dp_to_wei(units: u64) -> U256 {
    U256::from(units) * U256::from(100_000_000_000_000u64)
}

/// Wei rendered as ETH with 6 decimals, for log output only.
pub fn display_eth(wei: U256) -> String {
    let micro = wei / U256::from(1_000_000_000_000u64);
    let micro: u128 = micro.try_into().unwrap_or(u128::MAX);
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}
