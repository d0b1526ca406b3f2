//! OKX v5 funding API client

use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result, WrapErr};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{query_string, sign_request, Exchange, WithdrawalRequest, WithdrawalState};
use crate::account::ExchangeCredentials;
use crate::types::{Chain, ExchangeKind, WithdrawNetwork};

pub const OKX_API_URL: &str = "https://www.okx.com";

/// `dest` value for an on-chain withdrawal.
const DEST_ON_CHAIN: &str = "4";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyChain {
    chain: String,
    #[serde(default)]
    min_fee: Option<String>,
    #[serde(default)]
    fee: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalAck {
    wd_id: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawalStatus {
    state: String,
}

pub struct OkxClient {
    http: reqwest::Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

impl OkxClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, credentials: ExchangeCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// OKX chain identifier for a withdrawal network.
    pub fn chain_name(network: WithdrawNetwork) -> Result<&'static str> {
        match network {
            WithdrawNetwork::Bitcoin => Ok("BTC-Bitcoin"),
            WithdrawNetwork::Evm(Chain::Optimism) => Ok("ETH-Optimism"),
            WithdrawNetwork::Evm(Chain::Base) => Ok("ETH-Base"),
            WithdrawNetwork::Evm(Chain::Arbitrum) => Ok("ETH-Arbitrum One"),
            WithdrawNetwork::Evm(other) => Err(eyre!("OKX withdrawals to {} are not supported", other)),
        }
    }

    fn timestamp() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<T>> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = Self::timestamp();
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), path_and_query, body);
        let signature = sign_request(self.credentials.secret.expose(), &prehash)?;

        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(method = %method, path = path_and_query, "OKX request");
        let mut req = self
            .http
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase.expose())
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }

        let response = req.send().await.wrap_err("OKX request failed")?;
        let status = response.status();
        let text = response.text().await.wrap_err("Failed to read OKX response")?;
        if !status.is_success() {
            return Err(eyre!("OKX HTTP {}: {}", status, text));
        }
        let envelope: Envelope<T> =
            serde_json::from_str(&text).wrap_err_with(|| format!("Unexpected OKX response: {text}"))?;
        if envelope.code != "0" {
            return Err(eyre!("OKX error {}: {}", envelope.code, envelope.msg));
        }
        Ok(envelope.data)
    }

    async fn withdrawal_fee(&self, ccy: &str, chain: &str) -> Result<String> {
        let path = format!("/api/v5/asset/currencies?{}", query_string(&[("ccy", ccy.to_string())]));
        let chains: Vec<CurrencyChain> = self.request(Method::GET, &path, None).await?;
        chains
            .into_iter()
            .find(|c| c.chain == chain)
            .and_then(|c| c.min_fee.or(c.fee))
            .ok_or_else(|| eyre!("OKX lists no withdrawal fee for {} on {}", ccy, chain))
    }
}

#[async_trait]
impl Exchange for OkxClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Okx
    }

    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<String> {
        let ccy = request.currency.symbol();
        let chain = Self::chain_name(request.network)?;
        let fee = self.withdrawal_fee(ccy, chain).await?;

        let body = json!({
            "ccy": ccy,
            "amt": request.amount,
            "dest": DEST_ON_CHAIN,
            "toAddr": request.address,
            "fee": fee,
            "chain": chain,
        });
        let acks: Vec<WithdrawalAck> = self
            .request(Method::POST, "/api/v5/asset/withdrawal", Some(body))
            .await?;
        let id = acks
            .into_iter()
            .next()
            .map(|a| a.wd_id)
            .ok_or_else(|| eyre!("OKX withdrawal response carried no wdId"))?;

        info!(exchange = "OKX", withdrawal_id = %id, %request, fee = %fee, "Withdrawal requested");
        Ok(id)
    }

    async fn withdrawal_status(&self, withdrawal_id: &str) -> Result<WithdrawalState> {
        let path = format!(
            "/api/v5/asset/deposit-withdraw-status?{}",
            query_string(&[("wdId", withdrawal_id.to_string())])
        );
        let statuses: Vec<WithdrawalStatus> = self.request(Method::GET, &path, None).await?;
        let state = statuses
            .into_iter()
            .next()
            .map(|s| s.state)
            .ok_or_else(|| eyre!("OKX has no status for withdrawal {}", withdrawal_id))?;
        Ok(parse_state(&state))
    }
}

/// OKX reports a human readable state text.
fn parse_state(state: &str) -> WithdrawalState {
    let lower = state.to_lowercase();
    if lower.contains("withdrawal complete") {
        WithdrawalState::Completed
    } else if lower.contains("fail") || lower.contains("cancel") {
        WithdrawalState::Failed(state.to_string())
    } else {
        WithdrawalState::Pending(state.to_string())
    }
}
