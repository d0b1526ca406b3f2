//! alloy-backed [`ChainClient`]
//!
//! One client per (account, chain). Each configured RPC URL gets its own
//! wallet-filled provider; reads and submissions fall through to the next URL
//! when one endpoint errors. The per-account proxy, when set, is applied to
//! every RPC request.

use alloy::eips::BlockNumberOrTag;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::fillers::{FillProvider, JoinFill, WalletFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{BlockTransactionsKind, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::ChainClient;
use crate::redact::mask_proxy;
use crate::types::Chain;

type WalletProvider = FillProvider<
    JoinFill<Identity, WalletFiller<EthereumWallet>>,
    RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the reqwest client used for RPC and REST calls of one account.
pub fn http_client(proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(RPC_REQUEST_TIMEOUT);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(format!("http://{proxy}"))
            .wrap_err_with(|| format!("Invalid proxy {}", mask_proxy(proxy)))?;
        builder = builder.proxy(proxy);
    }
    builder.build().wrap_err("Failed to build HTTP client")
}

/// Try each provider in order, returning the first success.
macro_rules! first_ok {
    ($self:ident, $what:literal, |$provider:ident| $call:expr) => {'fallback: {
        let mut last_error = String::new();
        for (rpc_index, $provider) in $self.providers.iter().enumerate() {
            match $call {
                Ok(value) => break 'fallback Ok(value),
                Err(e) => {
                    warn!(chain = %$self.chain, rpc_index, error = %e, "{} failed on RPC", $what);
                    last_error = e.to_string();
                }
            }
        }
        Err(eyre!(
            "{} failed on every {} RPC endpoint: {}",
            $what,
            $self.chain,
            last_error
        ))
    }};
}

pub struct EvmChainClient {
    chain: Chain,
    sender: Address,
    providers: Vec<WalletProvider>,
}

impl EvmChainClient {
    pub fn connect(
        chain: Chain,
        rpc_urls: &[Url],
        signer: PrivateKeySigner,
        proxy: Option<&str>,
    ) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(eyre!("At least one RPC URL is required for {chain}"));
        }
        let sender = signer.address();
        let wallet = EthereumWallet::from(signer);
        let client = http_client(proxy)?;

        let providers = rpc_urls
            .iter()
            .map(|url| {
                let transport = Http::with_client(client.clone(), url.clone());
                ProviderBuilder::new()
                    .wallet(wallet.clone())
                    .on_client(RpcClient::new(transport, false))
            })
            .collect();

        info!(
            chain = %chain,
            sender = %sender,
            endpoints = rpc_urls.len(),
            proxied = proxy.is_some(),
            "EVM client initialized"
        );

        Ok(Self {
            chain,
            sender,
            providers,
        })
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    fn sender(&self) -> Address {
        self.sender
    }

    async fn gas_price(&self) -> Result<u128> {
        first_ok!(self, "eth_gasPrice", |provider| provider.get_gas_price().await)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        first_ok!(self, "eth_getBalance", |provider| provider
            .get_balance(address)
            .await)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        first_ok!(self, "eth_getTransactionCount", |provider| provider
            .get_transaction_count(address)
            .await)
    }

    async fn base_fee(&self) -> Result<u128> {
        let block = first_ok!(self, "eth_getBlockByNumber", |provider| provider
            .get_block_by_number(BlockNumberOrTag::Latest, BlockTransactionsKind::Hashes)
            .await)?;
        let block = block.ok_or_else(|| eyre!("{} returned no latest block", self.chain))?;
        block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| eyre!("{} latest block has no base fee", self.chain))
    }

    async fn max_priority_fee(&self) -> Result<u128> {
        first_ok!(self, "eth_maxPriorityFeePerGas", |provider| provider
            .get_max_priority_fee_per_gas()
            .await)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        first_ok!(self, "eth_estimateGas", |provider| provider
            .estimate_gas(tx)
            .await)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(to)
            .with_input(data);
        first_ok!(self, "eth_call", |provider| provider.call(&tx).await)
    }

    async fn send(&self, tx: TransactionRequest) -> Result<B256> {
        first_ok!(self, "eth_sendRawTransaction", |provider| provider
            .send_transaction(tx.clone())
            .await
            .map(|pending| *pending.tx_hash()))
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<bool>> {
        first_ok!(self, "eth_getTransactionReceipt", |provider| provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|receipt| receipt.map(|r| r.status())))
    }
}
