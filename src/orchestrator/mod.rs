//! Workflow orchestrator
//!
//! Drives every configured account through the status machine, one account at
//! a time, in configuration order. Each step persists its status and any new
//! identifier before the next one starts, so a crash or a failure at any point
//! resumes from the last persisted status on the next run.
//!
//! Collaborators are obtained per account through [`Services`], which lets the
//! same driver run against live APIs or in-memory doubles.

mod live;
mod steps;

use alloy::primitives::U256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};

use crate::account::{Account, AccountSettings};
use crate::bridge::{BridgeAggregator, BridgeSchedule};
use crate::chain::ChainClient;
use crate::confirmation::{PollSchedule, ReceiptWait};
use crate::error::FlowError;
use crate::exchanges::Exchange;
use crate::gas::GasGate;
use crate::lombard::DepositService;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::store::StateStore;
use crate::types::{AccountStatus, Chain};
use crate::vaults::VaultRegistry;

pub use live::LiveServices;

// ============================================================================
// Tunables
// ============================================================================

/// Minimum native balances that count as "enough gas".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    /// On Ethereum, where the mint is paid for.
    pub l1_min_balance: U256,
    /// On a secondary chain, enough to bridge over and still pay fees there.
    pub l2_min_balance: U256,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            l1_min_balance: U256::from(1_200_000_000_000_000u64),
            l2_min_balance: U256::from(2_200_000_000_000_000u64),
        }
    }
}

/// Timing of every wait the workflow performs.
#[derive(Debug, Clone)]
pub struct Schedules {
    pub gas_gate: GasGate,
    pub receipts: ReceiptWait,
    /// Mint, approve and vault deposit submission.
    pub submit_retry: RetryPolicy,
    /// Exchange withdrawal state, BTC and ETH alike.
    pub withdrawal: PollSchedule,
    /// Lombard notarization of the BTC deposit.
    pub notarization: PollSchedule,
    pub bridge: BridgeSchedule,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            gas_gate: GasGate::default(),
            receipts: ReceiptWait::default(),
            submit_retry: RetryPolicy::default(),
            withdrawal: PollSchedule::jitter(Duration::from_secs(60), Duration::from_secs(300), 6),
            notarization: PollSchedule::fixed(Duration::from_secs(30 * 60), 8),
            bridge: BridgeSchedule::default(),
        }
    }
}

/// Gas withdrawal size, in ETH ten-thousandths.
pub const GAS_WITHDRAWAL_RANGE: std::ops::RangeInclusive<u64> = 25..=35;

// ============================================================================
// Collaborators
// ============================================================================

/// Builds the clients one account talks to.
///
/// Implementations decide whether a client is proxied; the orchestrator only
/// asks for them.
pub trait Services: Send + Sync {
    fn chain(&self, settings: &AccountSettings, chain: Chain) -> eyre::Result<Arc<dyn ChainClient>>;

    fn exchange(&self, settings: &AccountSettings) -> eyre::Result<Arc<dyn Exchange>>;

    fn deposits(&self, settings: &AccountSettings) -> eyre::Result<Arc<dyn DepositService>>;

    fn bridge(&self, settings: &AccountSettings) -> eyre::Result<Arc<dyn BridgeAggregator>>;
}

// ============================================================================
// Driver
// ============================================================================

/// How one account's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Completed,
    /// Stopped on purpose, waiting for the operator (address whitelisting).
    Waiting(AccountStatus),
    /// Failed at this status; progress up to it is persisted.
    Failed { status: AccountStatus, kind: &'static str },
}

impl AccountOutcome {
    fn label(&self) -> &'static str {
        match self {
            AccountOutcome::Completed => "completed",
            AccountOutcome::Waiting(_) => "waiting",
            AccountOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub waiting: usize,
    pub failed: usize,
    /// Accounts never started because shutdown was requested.
    pub skipped: usize,
}

/// What a step tells the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    services: Arc<dyn Services>,
    vaults: VaultRegistry,
    thresholds: Thresholds,
    schedules: Schedules,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn StateStore>, services: Arc<dyn Services>, vaults: VaultRegistry) -> Self {
        Self {
            store,
            services,
            vaults,
            thresholds: Thresholds::default(),
            schedules: Schedules::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_schedules(mut self, schedules: Schedules) -> Self {
        self.schedules = schedules;
        self
    }

    /// Process every account once, in order.
    ///
    /// An account failure is logged and the next account starts. A store or
    /// configuration failure aborts the run. A message on `shutdown` lets the
    /// current account finish and skips the rest.
    pub async fn run(
        &self,
        accounts: Vec<AccountSettings>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<RunSummary, FlowError> {
        let total = accounts.len();
        let mut summary = RunSummary::default();
        info!(accounts = total, "Processing accounts");

        for (index, settings) in accounts.into_iter().enumerate() {
            if shutdown.try_recv().is_ok() {
                summary.skipped = total - index;
                warn!(skipped = summary.skipped, "Shutdown requested, skipping remaining accounts");
                break;
            }

            let span = tracing::info_span!("account", address = %settings.identity());
            let outcome = self.run_account(settings).instrument(span).await?;
            match outcome {
                AccountOutcome::Completed => summary.completed += 1,
                AccountOutcome::Waiting(_) => summary.waiting += 1,
                AccountOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        info!(
            completed = summary.completed,
            waiting = summary.waiting,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run finished"
        );
        Ok(summary)
    }

    /// Load, advance and persist one account.
    ///
    /// Only errors that must stop the whole run are returned.
    pub async fn run_account(&self, settings: AccountSettings) -> Result<AccountOutcome, FlowError> {
        let record = self.store.load(&settings.identity()).await?;
        let mut account = Account::new(settings, record);
        info!(status = %account.status(), "Account loaded");

        let outcome = match self.drive(&mut account).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal_for_run() => {
                error!(status = %account.status(), error = %e, "Run aborted");
                metrics::record_account_outcome("failed", e.kind());
                return Err(e);
            }
            Err(e) => {
                error!(status = %account.status(), error = %e, "Account failed, moving on");
                // Whatever was recorded before the failure must survive.
                self.persist(&account).await?;
                AccountOutcome::Failed {
                    status: account.status(),
                    kind: e.kind(),
                }
            }
        };

        let error_kind = match &outcome {
            AccountOutcome::Failed { kind, .. } => *kind,
            _ => "",
        };
        metrics::record_account_outcome(outcome.label(), error_kind);
        Ok(outcome)
    }

    async fn drive(&self, account: &mut Account) -> Result<AccountOutcome, FlowError> {
        while !account.status().is_terminal() {
            if self.step(account).await? == Flow::Stop {
                return Ok(AccountOutcome::Waiting(account.status()));
            }
        }
        info!("Account completed");
        Ok(AccountOutcome::Completed)
    }

    async fn persist(&self, account: &Account) -> Result<(), FlowError> {
        self.store.save(&account.identity, account.record()).await?;
        Ok(())
    }

    /// Advance to `next` and persist, together with whatever the step recorded.
    async fn transition(&self, account: &mut Account, next: AccountStatus) -> Result<(), FlowError> {
        let from = account.status();
        account.advance(next)?;
        self.persist(account).await?;
        metrics::record_transition(next);
        info!(%from, to = %next, "Status updated");
        Ok(())
    }
}
