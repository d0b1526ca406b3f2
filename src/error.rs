//! Error taxonomy for the account workflow
//!
//! Collaborator clients report failures as `eyre::Report`; the orchestrator
//! lifts them into [`FlowError`] so the per-account driver can tell an
//! account-level failure from one that must abort the whole run.

use thiserror::Error;

use crate::types::AccountStatus;

/// Errors raised while loading or validating configuration.
///
/// Any of these aborts the run before a single account is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} environment variable is required")]
    MissingEnv { name: &'static str },

    #[error("{name} environment variable is invalid: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error("failed to read accounts file {path}: {source}")]
    AccountsFile {
        path: String,
        #[source]
        source: ::config::ConfigError,
    },

    #[error("account row {row}: field `{field}` {reason}")]
    InvalidRow {
        row: usize,
        field: &'static str,
        reason: String,
    },

    #[error("account row {row}: duplicate identity {identity} (first seen in row {first})")]
    DuplicateIdentity {
        row: usize,
        first: usize,
        identity: String,
    },

    #[error("accounts file {path} contains no accounts")]
    Empty { path: String },
}

/// Failure of the persistence layer. Always fatal for the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {path} is unreadable: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("state I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything a workflow step can fail with.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store failure: {0}")]
    Store(#[from] StoreError),

    #[error("{what} not satisfied after {checks} checks")]
    PollTimeout { what: String, checks: u32 },

    #[error("{what} reported terminal failure: {detail}")]
    PollFailed { what: String, detail: String },

    #[error("transaction {tx_hash} not mined within {secs}s")]
    ReceiptTimeout { tx_hash: String, secs: u64 },

    #[error("transaction {tx_hash} failed on-chain")]
    TxFailed { tx_hash: String },

    #[error("gas price on {chain} stayed above {ceiling_gwei} gwei for {waited_secs}s")]
    GasPriceTimeout {
        chain: String,
        ceiling_gwei: u64,
        waited_secs: u64,
    },

    #[error("bridge from {origin} is disabled")]
    BridgeDisabled { origin: String },

    #[error("bridge amount {amount} exceeds solver capacity {capacity} after {attempts} config fetches")]
    BridgeCapacity {
        amount: String,
        capacity: String,
        attempts: u32,
    },

    #[error("bridge returned no usable quote: {0}")]
    NoQuote(String),

    #[error("bridge settlement ended with status {status}: {detail}")]
    BridgeFailed { status: String, detail: String },

    #[error("insufficient {asset} balance: {detail}")]
    InsufficientBalance { asset: &'static str, detail: String },

    #[error("vault `{0}` is not registered")]
    UnsupportedVault(String),

    #[error("step {status} requires `{field}` which was never recorded")]
    MissingField {
        status: AccountStatus,
        field: &'static str,
    },

    #[error("`{field}` already recorded as {existing}, refusing to overwrite with {attempted}")]
    WriteOnce {
        field: &'static str,
        existing: String,
        attempted: String,
    },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("{0:#}")]
    External(eyre::Report),
}

impl From<eyre::Report> for FlowError {
    fn from(report: eyre::Report) -> Self {
        FlowError::External(report)
    }
}

impl FlowError {
    /// True when the error must stop processing of every remaining account.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, FlowError::Store(_) | FlowError::Config(_))
    }

    /// Short machine-friendly label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Config(_) => "config",
            FlowError::Store(_) => "store",
            FlowError::PollTimeout { .. } => "poll_timeout",
            FlowError::PollFailed { .. } => "poll_failed",
            FlowError::ReceiptTimeout { .. } => "receipt_timeout",
            FlowError::TxFailed { .. } => "tx_failed",
            FlowError::GasPriceTimeout { .. } => "gas_price_timeout",
            FlowError::BridgeDisabled { .. } => "bridge_disabled",
            FlowError::BridgeCapacity { .. } => "bridge_capacity",
            FlowError::NoQuote(_) => "no_quote",
            FlowError::BridgeFailed { .. } => "bridge_failed",
            FlowError::InsufficientBalance { .. } => "insufficient_balance",
            FlowError::UnsupportedVault(_) => "unsupported_vault",
            FlowError::MissingField { .. } => "missing_field",
            FlowError::WriteOnce { .. } => "write_once",
            FlowError::IllegalTransition { .. } => "illegal_transition",
            FlowError::External(_) => "external",
        }
    }
}
