//! One function per account status.
//!
//! Every step either transitions (persisting as it goes) and returns
//! [`Flow::Continue`], or stops the account for this run with [`Flow::Stop`].
//! Steps that submit something check the persisted identifier first and skip
//! the submission when it is already there.

use alloy::primitives::U256;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use super::{Flow, Orchestrator, GAS_WITHDRAWAL_RANGE};
use crate::account::{Account, DepositAddressSource, Field};
use crate::bridge::BridgeSaga;
use crate::chain::contracts::{balance_of_data, decode_balance, decode_hex_blob, mint_call, LBTC_ADDRESS};
use crate::chain::{format_tx_hash, parse_tx_hash, submit_legacy, ChainClient, ContractCall};
use crate::confirmation::{poll_until, PollOutcome, PollSchedule};
use crate::error::FlowError;
use crate::exchanges::{Exchange, WithdrawalRequest, WithdrawalState};
use crate::lombard::{describe_pending, latest_notarized};
use crate::metrics;
use crate::retry::with_retry;
use crate::types::{display_eth, format_btc, format_eth_4dp, AccountStatus, Chain, Currency, WithdrawNetwork};

impl Orchestrator {
    pub(crate) async fn step(&self, account: &mut Account) -> Result<Flow, FlowError> {
        debug!(status = %account.status(), "Running step");
        match account.status() {
            AccountStatus::Init => self.prepare_address(account).await,
            AccountStatus::AddressGeneratedWaiting => {
                info!("Re-run after address generation, treating the address as whitelisted");
                self.transition(account, AccountStatus::AddressGenerated).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::AddressGenerated => self.withdraw_btc(account).await,
            AccountStatus::DepositInitiated => {
                self.await_withdrawal(account, Field::WithdrawalId, "BTC withdrawal").await?;
                self.transition(account, AccountStatus::DepositConfirmationsPending).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::DepositConfirmationsPending => self.await_notarization(account).await,
            AccountStatus::CheckingL1Balance => self.check_l1_balance(account).await,
            AccountStatus::CheckingL2Balance => self.check_l2_balance(account).await,
            AccountStatus::WithdrawingGasFromExchange => self.withdraw_gas(account).await,
            AccountStatus::WithdrawConfirmation => {
                self.await_withdrawal(account, Field::GasWithdrawalId, "ETH withdrawal").await?;
                self.transition(account, AccountStatus::Bridging).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::Bridging => self.bridge_gas(account).await,
            AccountStatus::ConfirmationsPending => self.mint(account).await,
            AccountStatus::Minting => {
                let tx_hash = parse_tx_hash(account.require(Field::TxHashMint)?)?;
                let eth = self.ethereum(account)?;
                self.schedules.receipts.wait(eth.as_ref(), tx_hash).await?;
                self.transition(account, AccountStatus::MintConfirmation).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::MintConfirmation => self.restake(account).await,
            AccountStatus::Restaking => {
                let tx_hash = parse_tx_hash(account.require(Field::TxHashRestake)?)?;
                let eth = self.ethereum(account)?;
                self.schedules.receipts.wait(eth.as_ref(), tx_hash).await?;
                self.transition(account, AccountStatus::RestakeConfirmation).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::RestakeConfirmation => {
                self.transition(account, AccountStatus::Completed).await?;
                Ok(Flow::Continue)
            }
            AccountStatus::Completed => Ok(Flow::Stop),
        }
    }

    fn ethereum(&self, account: &Account) -> Result<std::sync::Arc<dyn ChainClient>, FlowError> {
        Ok(self.services.chain(&account.settings, Chain::Ethereum)?)
    }

    // ========================================================================
    // BTC side
    // ========================================================================

    async fn prepare_address(&self, account: &mut Account) -> Result<Flow, FlowError> {
        match account.settings.deposit_address.clone() {
            DepositAddressSource::Existing(address) => {
                account.set(Field::DerivedAddress, address)?;
                self.transition(account, AccountStatus::AddressGenerated).await?;
                Ok(Flow::Continue)
            }
            DepositAddressSource::Generate if account.get(Field::DerivedAddress).is_some() => {
                debug!("Deposit address already recorded, skipping generation");
                self.transition(account, AccountStatus::AddressGenerated).await?;
                Ok(Flow::Continue)
            }
            DepositAddressSource::Generate => {
                let deposits = self.services.deposits(&account.settings)?;
                let address = deposits.generate_deposit_address().await?;
                account.set(Field::DerivedAddress, address.clone())?;
                self.transition(account, AccountStatus::AddressGeneratedWaiting).await?;
                info!(
                    btc_address = %address,
                    "Whitelist this BTC address on the exchange, then run again"
                );
                Ok(Flow::Stop)
            }
        }
    }

    async fn withdraw_btc(&self, account: &mut Account) -> Result<Flow, FlowError> {
        if let Some(id) = account.get(Field::WithdrawalId) {
            debug!(withdrawal_id = id, "BTC withdrawal already requested");
        } else {
            let address = account.require(Field::DerivedAddress)?.to_string();
            let settings = &account.settings;
            let sats = rand::thread_rng().gen_range(settings.min_btc_sats..=settings.max_btc_sats);
            let request = WithdrawalRequest {
                currency: Currency::Btc,
                network: WithdrawNetwork::Bitcoin,
                amount: format_btc(sats),
                address,
            };

            let exchange = self.services.exchange(settings)?;
            let id = request_withdrawal(exchange.as_ref(), &request).await?;
            account.set(Field::WithdrawalId, id)?;
        }
        self.transition(account, AccountStatus::DepositInitiated).await?;
        Ok(Flow::Continue)
    }

    /// Poll the exchange until the withdrawal recorded in `field` completes.
    async fn await_withdrawal(&self, account: &Account, field: Field, what: &str) -> Result<(), FlowError> {
        let id = account.require(field)?;
        let exchange = self.services.exchange(&account.settings)?;
        poll_withdrawal(exchange.as_ref(), id, what, &self.schedules.withdrawal).await?;
        info!(withdrawal_id = id, "{} completed", what);
        Ok(())
    }

    async fn await_notarization(&self, account: &mut Account) -> Result<Flow, FlowError> {
        let btc_address = account.require(Field::DerivedAddress)?.to_string();
        let deposits = self.services.deposits(&account.settings)?;
        let deposits = deposits.as_ref();
        let btc_address = btc_address.as_str();

        let txid = poll_until("BTC deposit notarization", &self.schedules.notarization, |_| async move {
            let outputs = deposits.deposits().await?;
            Ok(match latest_notarized(&outputs, btc_address) {
                Some(output) => PollOutcome::Ready(output.txid.clone().unwrap_or_default()),
                None => PollOutcome::Pending(describe_pending(&outputs, btc_address)),
            })
        })
        .await?;

        info!(txid = %txid, "BTC deposit notarized");
        self.transition(account, AccountStatus::CheckingL1Balance).await?;
        Ok(Flow::Continue)
    }

    // ========================================================================
    // Gas
    // ========================================================================

    async fn check_l1_balance(&self, account: &mut Account) -> Result<Flow, FlowError> {
        let eth = self.ethereum(account)?;
        let balance = eth.balance(account.identity).await?;
        let enough = balance >= self.thresholds.l1_min_balance;
        info!(balance_eth = %display_eth(balance), enough, "Ethereum balance checked");

        let next = if enough {
            AccountStatus::ConfirmationsPending
        } else {
            AccountStatus::CheckingL2Balance
        };
        self.transition(account, next).await?;
        Ok(Flow::Continue)
    }

    async fn check_l2_balance(&self, account: &mut Account) -> Result<Flow, FlowError> {
        for chain in Chain::SECONDARY_PRIORITY {
            let client = self.services.chain(&account.settings, chain)?;
            let balance = client.balance(account.identity).await?;
            info!(chain = %chain, balance_eth = %display_eth(balance), "Secondary chain balance checked");

            if balance >= self.thresholds.l2_min_balance {
                account.set_gas_source_chain(chain)?;
                self.transition(account, AccountStatus::Bridging).await?;
                return Ok(Flow::Continue);
            }
        }

        info!("No secondary chain holds enough gas, withdrawing from the exchange");
        self.transition(account, AccountStatus::WithdrawingGasFromExchange).await?;
        Ok(Flow::Continue)
    }

    async fn withdraw_gas(&self, account: &mut Account) -> Result<Flow, FlowError> {
        if let Some(id) = account.get(Field::GasWithdrawalId) {
            debug!(withdrawal_id = id, "ETH withdrawal already requested");
        } else {
            let (units, chain) = {
                let mut rng = rand::thread_rng();
                let units = rng.gen_range(GAS_WITHDRAWAL_RANGE);
                let chain = *Chain::GAS_WITHDRAWAL_TARGETS
                    .choose(&mut rng)
                    .unwrap_or(&Chain::Optimism);
                (units, chain)
            };
            let request = WithdrawalRequest {
                currency: Currency::Eth,
                network: WithdrawNetwork::Evm(chain),
                amount: format_eth_4dp(units),
                address: account.identity.to_checksum(None),
            };

            let exchange = self.services.exchange(&account.settings)?;
            let id = request_withdrawal(exchange.as_ref(), &request).await?;
            account.set(Field::GasWithdrawalId, id)?;
            account.set_gas_source_chain(chain)?;
        }
        self.transition(account, AccountStatus::WithdrawConfirmation).await?;
        Ok(Flow::Continue)
    }

    async fn bridge_gas(&self, account: &mut Account) -> Result<Flow, FlowError> {
        let origin = account.gas_source_chain().ok_or(FlowError::MissingField {
            status: account.status(),
            field: "gas_source_chain",
        })?;
        let source = self.services.chain(&account.settings, origin)?;
        let aggregator = self.services.bridge(&account.settings)?;
        let saga = BridgeSaga {
            aggregator: aggregator.as_ref(),
            source: source.as_ref(),
            destination: Chain::Ethereum,
            gate: &self.schedules.gas_gate,
            receipts: &self.schedules.receipts,
            schedule: &self.schedules.bridge,
            max_gas_gwei: account.settings.max_gas_gwei,
        };

        match account.get(Field::TxHashBridge) {
            Some(hash) => {
                let tx_hash = parse_tx_hash(hash)?;
                let endpoint = account.require(Field::BridgeCheckEndpoint)?;
                info!(tx_hash = hash, "Bridge already submitted, waiting for settlement");
                saga.settle(tx_hash, endpoint, None).await?;
            }
            None => {
                let submitted = saga.submit().await?;
                account.set(Field::TxHashBridge, format_tx_hash(&submitted.tx_hash))?;
                account.set(Field::BridgeCheckEndpoint, submitted.check_endpoint.clone())?;
                self.persist(account).await?;
                saga.settle(
                    submitted.tx_hash,
                    &submitted.check_endpoint,
                    Some(submitted.time_estimate),
                )
                .await?;
            }
        }

        self.transition(account, AccountStatus::ConfirmationsPending).await?;
        Ok(Flow::Continue)
    }

    // ========================================================================
    // LBTC
    // ========================================================================

    async fn mint(&self, account: &mut Account) -> Result<Flow, FlowError> {
        if let Some(hash) = account.get(Field::TxHashMint) {
            debug!(tx_hash = hash, "Mint already submitted");
        } else {
            let btc_address = account.require(Field::DerivedAddress)?;
            let deposits = self.services.deposits(&account.settings)?;
            let outputs = deposits.deposits().await?;
            let output = latest_notarized(&outputs, btc_address).ok_or_else(|| {
                eyre::eyre!(
                    "no notarized deposit to {} ({})",
                    btc_address,
                    describe_pending(&outputs, btc_address)
                )
            })?;
            let payload = decode_hex_blob("raw_payload", output.raw_payload.as_deref().unwrap_or_default())?;
            let proof = decode_hex_blob("signature", output.signature.as_deref().unwrap_or_default())?;

            let eth = self.ethereum(account)?;
            let tx_hash = self.submit_gated(eth.as_ref(), account, &mint_call(payload, proof)).await?;
            info!(tx_hash = %format_tx_hash(&tx_hash), "Mint submitted");
            account.set(Field::TxHashMint, format_tx_hash(&tx_hash))?;
        }
        self.transition(account, AccountStatus::Minting).await?;
        Ok(Flow::Continue)
    }

    async fn restake(&self, account: &mut Account) -> Result<Flow, FlowError> {
        let Some(vault_name) = account.settings.vault.clone() else {
            self.transition(account, AccountStatus::Completed).await?;
            return Ok(Flow::Continue);
        };
        if let Some(hash) = account.get(Field::TxHashRestake) {
            debug!(tx_hash = hash, "Vault deposit already submitted");
            self.transition(account, AccountStatus::Restaking).await?;
            return Ok(Flow::Continue);
        }

        let vault = self.vaults.get(&vault_name)?;
        let eth = self.ethereum(account)?;
        let amount = lbtc_balance(eth.as_ref(), account).await?;
        info!(vault = vault.name(), amount = %amount, "Restaking LBTC");

        let approve_hash = match account.get(Field::TxHashApprove) {
            Some(hash) => parse_tx_hash(hash)?,
            None => {
                let call = vault.approve(LBTC_ADDRESS, amount);
                let hash = self.submit_gated(eth.as_ref(), account, &call).await?;
                account.set(Field::TxHashApprove, format_tx_hash(&hash))?;
                self.persist(account).await?;
                hash
            }
        };
        self.schedules.receipts.wait(eth.as_ref(), approve_hash).await?;

        let call = vault.deposit(LBTC_ADDRESS, amount);
        let deposit_hash = self.submit_gated(eth.as_ref(), account, &call).await?;
        info!(tx_hash = %format_tx_hash(&deposit_hash), "Vault deposit submitted");
        account.set(Field::TxHashRestake, format_tx_hash(&deposit_hash))?;
        self.transition(account, AccountStatus::Restaking).await?;
        Ok(Flow::Continue)
    }

    /// Gas gate, then legacy submission with bounded retry.
    async fn submit_gated(
        &self,
        client: &dyn ChainClient,
        account: &Account,
        call: &ContractCall,
    ) -> Result<alloy::primitives::B256, FlowError> {
        self.schedules
            .gas_gate
            .await_acceptable_price(client, account.settings.max_gas_gwei)
            .await?;
        let hash = with_retry(&self.schedules.submit_retry, call.label, |_| submit_legacy(client, call)).await?;
        Ok(hash)
    }
}

async fn request_withdrawal(exchange: &dyn Exchange, request: &WithdrawalRequest) -> Result<String, FlowError> {
    info!(exchange = %exchange.kind(), request = %request, "Requesting withdrawal");
    let id = exchange.withdraw(request).await?;
    metrics::record_withdrawal(exchange.kind().as_str(), request.currency.symbol());
    info!(withdrawal_id = %id, "Withdrawal requested");
    Ok(id)
}

async fn poll_withdrawal(
    exchange: &dyn Exchange,
    id: &str,
    what: &str,
    schedule: &PollSchedule,
) -> Result<(), FlowError> {
    poll_until(what, schedule, |_| async move {
        Ok(match exchange.withdrawal_status(id).await? {
            WithdrawalState::Completed => PollOutcome::Ready(()),
            WithdrawalState::Pending(state) => PollOutcome::Pending(state),
            WithdrawalState::Failed(state) => PollOutcome::Failed(state),
        })
    })
    .await
}

async fn lbtc_balance(eth: &dyn ChainClient, account: &Account) -> Result<U256, FlowError> {
    let raw = eth.call(LBTC_ADDRESS, balance_of_data(account.identity)).await?;
    let balance = decode_balance(&raw)?;
    if balance.is_zero() {
        return Err(FlowError::InsufficientBalance {
            asset: "LBTC",
            detail: format!("{} holds no LBTC to restake", account.identity),
        });
    }
    Ok(balance)
}
