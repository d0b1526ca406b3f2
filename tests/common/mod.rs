//! In-memory collaborators for driving the orchestrator without network access.

#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lbtc_operator::account::{AccountRecord, AccountSettings, DepositAddressSource, ExchangeCredentials};
use lbtc_operator::bridge::{BridgeAggregator, BridgeConfig, BridgeQuote, BridgeSchedule, BridgeStatus};
use lbtc_operator::chain::ChainClient;
use lbtc_operator::confirmation::{PollSchedule, ReceiptWait};
use lbtc_operator::error::StoreError;
use lbtc_operator::exchanges::{Exchange, WithdrawalRequest, WithdrawalState};
use lbtc_operator::gas::GasGate;
use lbtc_operator::lombard::{DepositOutput, DepositService};
use lbtc_operator::orchestrator::{Schedules, Services};
use lbtc_operator::redact::Secret;
use lbtc_operator::retry::RetryPolicy;
use lbtc_operator::store::StateStore;
use lbtc_operator::types::{Chain, ExchangeKind};

pub const GENERATED_ADDRESS: &str = "bc1qgenerated0000000000000000000000000000";
pub const EXISTING_ADDRESS: &str = "bc1qexisting00000000000000000000000000000";

pub fn milli_eth(milli: u64) -> U256 {
    U256::from(milli) * U256::from(1_000_000_000_000_000u64)
}

pub fn gwei(n: u128) -> u128 {
    n * 1_000_000_000
}

// ============================================================================
// Settings
// ============================================================================

pub fn settings(deposit_address: DepositAddressSource, vault: Option<&str>) -> AccountSettings {
    AccountSettings {
        signer: PrivateKeySigner::random(),
        proxy: None,
        max_gas_gwei: None,
        exchange: ExchangeCredentials {
            kind: ExchangeKind::Okx,
            api_key: "api-key".into(),
            secret: Secret::new("api-secret"),
            passphrase: Secret::new("api-passphrase"),
        },
        deposit_address,
        min_btc_sats: 100_000,
        max_btc_sats: 200_000,
        vault: vault.map(String::from),
    }
}

pub fn existing_address_settings() -> AccountSettings {
    settings(DepositAddressSource::Existing(EXISTING_ADDRESS.into()), None)
}

/// Production-like waits; tests run on a paused clock so these cost nothing.
pub fn fast_schedules() -> Schedules {
    let retry = RetryPolicy {
        max_attempts: 3,
        min_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(20),
    };
    Schedules {
        gas_gate: GasGate::new(Duration::from_secs(60), Some(Duration::from_secs(3600))),
        receipts: ReceiptWait {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        },
        submit_retry: retry.clone(),
        withdrawal: PollSchedule::fixed(Duration::from_secs(60), 6),
        notarization: PollSchedule::fixed(Duration::from_secs(1800), 8),
        bridge: BridgeSchedule {
            capacity_attempts: 5,
            capacity_backoff: retry,
            status: PollSchedule::fixed(Duration::from_secs(30), 6),
        },
    }
}

// ============================================================================
// Chain
// ============================================================================

pub struct MockChain {
    pub chain: Chain,
    pub sender: Address,
    pub balance: Mutex<U256>,
    /// Returned by `balanceOf` through `call`.
    pub token_balance: Mutex<U256>,
    /// Consumed front to back; the last price repeats.
    pub gas_prices: Mutex<VecDeque<u128>>,
    pub gas_price_reads: Mutex<u32>,
    /// `None` = pending forever.
    pub receipt_status: Mutex<Option<bool>>,
    /// Number of upcoming sends that fail with `send_error`.
    pub failing_sends: Mutex<u32>,
    pub send_error: Mutex<String>,
    pub send_attempts: Mutex<u32>,
    pub sent: Mutex<Vec<TransactionRequest>>,
}

impl MockChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            sender: Address::ZERO,
            balance: Mutex::new(U256::ZERO),
            token_balance: Mutex::new(U256::ZERO),
            gas_prices: Mutex::new(VecDeque::from([gwei(10)])),
            gas_price_reads: Mutex::new(0),
            receipt_status: Mutex::new(Some(true)),
            failing_sends: Mutex::new(0),
            send_error: Mutex::new("connection reset by peer".into()),
            send_attempts: Mutex::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_balance(self, balance: U256) -> Self {
        *self.balance.lock().unwrap() = balance;
        self
    }

    pub fn with_gas_prices(self, prices: &[u128]) -> Self {
        *self.gas_prices.lock().unwrap() = prices.iter().copied().collect();
        self
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn gas_price(&self) -> Result<u128> {
        *self.gas_price_reads.lock().unwrap() += 1;
        let mut prices = self.gas_prices.lock().unwrap();
        let price = if prices.len() > 1 {
            prices.pop_front()
        } else {
            prices.front().copied()
        };
        price.ok_or_else(|| eyre!("no gas price configured"))
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn base_fee(&self) -> Result<u128> {
        Ok(gwei(2))
    }

    async fn max_priority_fee(&self) -> Result<u128> {
        Ok(gwei(1))
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
        Ok(150_000)
    }

    async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes> {
        let balance = *self.token_balance.lock().unwrap();
        Ok(Bytes::from(balance.to_be_bytes::<32>().to_vec()))
    }

    async fn send(&self, tx: TransactionRequest) -> Result<B256> {
        *self.send_attempts.lock().unwrap() += 1;
        {
            let mut failing = self.failing_sends.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(eyre!("{}", self.send_error.lock().unwrap()));
            }
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        Ok(keccak256(format!("{}-{}", self.chain, sent.len())))
    }

    async fn receipt(&self, _tx_hash: B256) -> Result<Option<bool>> {
        Ok(*self.receipt_status.lock().unwrap())
    }
}

// ============================================================================
// Exchange
// ============================================================================

pub struct MockExchange {
    pub requests: Mutex<Vec<WithdrawalRequest>>,
    /// Consumed front to back; `Completed` once empty.
    pub states: Mutex<VecDeque<WithdrawalState>>,
    pub status_checks: Mutex<u32>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            states: Mutex::new(VecDeque::new()),
            status_checks: Mutex::new(0),
        }
    }

    pub fn requests(&self) -> Vec<WithdrawalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Okx
    }

    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<String> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("wd-{}", requests.len()))
    }

    async fn withdrawal_status(&self, _withdrawal_id: &str) -> Result<WithdrawalState> {
        *self.status_checks.lock().unwrap() += 1;
        Ok(self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(WithdrawalState::Completed))
    }
}

// ============================================================================
// Deposit service
// ============================================================================

pub struct MockDeposits {
    pub generated: Mutex<u32>,
    pub outputs: Mutex<Vec<DepositOutput>>,
}

impl MockDeposits {
    pub fn new() -> Self {
        Self {
            generated: Mutex::new(0),
            outputs: Mutex::new(Vec::new()),
        }
    }

    /// Record a notarized deposit to `address`.
    pub fn notarize(&self, address: &str) {
        self.outputs.lock().unwrap().push(DepositOutput {
            txid: Some("b7c1".into()),
            address: Some(address.into()),
            raw_payload: Some("0xf2e73f7c0000000000000000000000000000000000000000000000000000000000000001".into()),
            signature: Some("0x0102030405".into()),
            notarization_wait_dur: None,
        });
    }
}

#[async_trait]
impl DepositService for MockDeposits {
    async fn generate_deposit_address(&self) -> Result<String> {
        *self.generated.lock().unwrap() += 1;
        Ok(GENERATED_ADDRESS.into())
    }

    async fn deposits(&self) -> Result<Vec<DepositOutput>> {
        Ok(self.outputs.lock().unwrap().clone())
    }
}

// ============================================================================
// Bridge
// ============================================================================

pub struct MockBridge {
    pub enabled: Mutex<bool>,
    /// One entry per config fetch; the last repeats.
    pub amounts: Mutex<VecDeque<(U256, U256)>>,
    pub config_fetches: Mutex<u32>,
    pub quote: Mutex<Option<BridgeQuote>>,
    pub quotes_requested: Mutex<u32>,
    pub statuses: Mutex<VecDeque<BridgeStatus>>,
    pub status_checks: Mutex<u32>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            enabled: Mutex::new(true),
            amounts: Mutex::new(VecDeque::from([(milli_eth(2), milli_eth(1000))])),
            config_fetches: Mutex::new(0),
            quote: Mutex::new(Some(BridgeQuote {
                to: Address::repeat_byte(0xa5),
                data: Bytes::from_static(&[0x58, 0x10, 0x9c]),
                value: milli_eth(2),
                check_endpoint: "/intents/status?requestId=0xabc".into(),
                time_estimate: Duration::from_secs(12),
            })),
            quotes_requested: Mutex::new(0),
            statuses: Mutex::new(VecDeque::new()),
            status_checks: Mutex::new(0),
        }
    }
}

#[async_trait]
impl BridgeAggregator for MockBridge {
    async fn config(&self, _origin: Chain, _destination: Chain, _user: Address) -> Result<BridgeConfig> {
        *self.config_fetches.lock().unwrap() += 1;
        let mut amounts = self.amounts.lock().unwrap();
        let (user_max_amount, solver_capacity) = if amounts.len() > 1 {
            amounts.pop_front()
        } else {
            amounts.front().copied()
        }
        .ok_or_else(|| eyre!("no bridge amounts configured"))?;
        Ok(BridgeConfig {
            enabled: *self.enabled.lock().unwrap(),
            user_max_amount,
            solver_capacity,
        })
    }

    async fn quote(
        &self,
        _origin: Chain,
        _destination: Chain,
        _user: Address,
        _amount: U256,
    ) -> Result<Option<BridgeQuote>> {
        *self.quotes_requested.lock().unwrap() += 1;
        Ok(self.quote.lock().unwrap().clone())
    }

    async fn status(&self, _check_endpoint: &str) -> Result<BridgeStatus> {
        *self.status_checks.lock().unwrap() += 1;
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(BridgeStatus::Success))
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<Address, AccountRecord>>,
    pub saves: Mutex<u32>,
    pub fail_saves: Mutex<bool>,
}

impl MemoryStore {
    pub fn record(&self, identity: &Address) -> Option<AccountRecord> {
        self.records.lock().unwrap().get(identity).cloned()
    }

    pub fn insert(&self, identity: Address, record: AccountRecord) {
        self.records.lock().unwrap().insert(identity, record);
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, identity: &Address) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.record(identity))
    }

    async fn save(&self, identity: &Address, record: &AccountRecord) -> Result<(), StoreError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        *self.saves.lock().unwrap() += 1;
        self.insert(*identity, record.clone());
        Ok(())
    }
}

// ============================================================================
// Services
// ============================================================================

pub struct MockServices {
    pub chains: HashMap<Chain, Arc<MockChain>>,
    pub exchange: Arc<MockExchange>,
    pub deposits: Arc<MockDeposits>,
    pub bridge: Arc<MockBridge>,
}

impl MockServices {
    /// Every chain empty, exchange withdrawals complete at once, no deposits yet.
    pub fn new() -> Self {
        let chains = [Chain::Ethereum, Chain::Optimism, Chain::Base, Chain::Arbitrum]
            .into_iter()
            .map(|c| (c, Arc::new(MockChain::new(c))))
            .collect();
        Self {
            chains,
            exchange: Arc::new(MockExchange::new()),
            deposits: Arc::new(MockDeposits::new()),
            bridge: Arc::new(MockBridge::new()),
        }
    }

    pub fn with_chain(mut self, chain: MockChain) -> Self {
        self.chains.insert(chain.chain, Arc::new(chain));
        self
    }

    pub fn chain(&self, chain: Chain) -> Arc<MockChain> {
        self.chains[&chain].clone()
    }
}

impl Services for MockServices {
    fn chain(&self, _settings: &AccountSettings, chain: Chain) -> Result<Arc<dyn ChainClient>> {
        let client = self
            .chains
            .get(&chain)
            .cloned()
            .ok_or_else(|| eyre!("no mock for {chain}"))?;
        Ok(client)
    }

    fn exchange(&self, _settings: &AccountSettings) -> Result<Arc<dyn Exchange>> {
        Ok(self.exchange.clone())
    }

    fn deposits(&self, _settings: &AccountSettings) -> Result<Arc<dyn DepositService>> {
        Ok(self.deposits.clone())
    }

    fn bridge(&self, _settings: &AccountSettings) -> Result<Arc<dyn BridgeAggregator>> {
        Ok(self.bridge.clone())
    }
}
