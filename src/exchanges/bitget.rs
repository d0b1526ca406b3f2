//! Bitget v2 spot wallet API client

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use eyre::{eyre, Result, WrapErr};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{query_string, sign_request, Exchange, WithdrawalRequest, WithdrawalState};
use crate::account::ExchangeCredentials;
use crate::types::{Chain, ExchangeKind, WithdrawNetwork};

pub const BITGET_API_URL: &str = "https://api.bitget.com";

const SUCCESS_CODE: &str = "00000";

/// Withdrawal records can only be queried inside a 90 day window.
const RECORD_WINDOW_DAYS: i64 = 89;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalAck {
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalRecord {
    order_id: String,
    status: String,
}

pub struct BitgetClient {
    http: reqwest::Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

impl BitgetClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, credentials: ExchangeCredentials) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn chain_name(network: WithdrawNetwork) -> Result<&'static str> {
        match network {
            WithdrawNetwork::Bitcoin => Ok("BITCOIN"),
            WithdrawNetwork::Evm(Chain::Optimism) => Ok("OPTIMISM"),
            WithdrawNetwork::Evm(Chain::Base) => Ok("BASE"),
            WithdrawNetwork::Evm(Chain::Arbitrum) => Ok("ARBITRUMONE"),
            WithdrawNetwork::Evm(other) => Err(eyre!("Bitget withdrawals to {} are not supported", other)),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, query_string(query))
        };
        let timestamp = Utc::now().timestamp_millis().to_string();
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), path_and_query, body);
        let signature = sign_request(self.credentials.secret.expose(), &prehash)?;

        debug!(method = %method, path = %path_and_query, "Bitget request");
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path_and_query))
            .header("ACCESS-KEY", &self.credentials.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", self.credentials.passphrase.expose())
            .header("locale", "en-US")
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }

        let response = req.send().await.wrap_err("Bitget request failed")?;
        let status = response.status();
        let text = response.text().await.wrap_err("Failed to read Bitget response")?;
        if !status.is_success() {
            return Err(eyre!("Bitget HTTP {}: {}", status, text));
        }
        let envelope: Envelope<T> = serde_json::from_str(&text)
            .wrap_err_with(|| format!("Unexpected Bitget response: {text}"))?;
        if envelope.code != SUCCESS_CODE {
            return Err(eyre!("Bitget error {}: {}", envelope.code, envelope.msg));
        }
        envelope
            .data
            .ok_or_else(|| eyre!("Bitget response for {} carried no data", path))
    }
}

#[async_trait]
impl Exchange for BitgetClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Bitget
    }

    async fn withdraw(&self, request: &WithdrawalRequest) -> Result<String> {
        let body = json!({
            "coin": request.currency.symbol(),
            "transferType": "on_chain",
            "address": request.address,
            "chain": Self::chain_name(request.network)?,
            "size": request.amount,
        });
        let ack: WithdrawalAck = self
            .request(Method::POST, "/api/v2/spot/wallet/withdrawal", &[], Some(body))
            .await?;

        info!(exchange = "Bitget", withdrawal_id = %ack.order_id, %request, "Withdrawal requested");
        Ok(ack.order_id)
    }

    async fn withdrawal_status(&self, withdrawal_id: &str) -> Result<WithdrawalState> {
        let now = Utc::now();
        let start = now - ChronoDuration::days(RECORD_WINDOW_DAYS);
        let query = [
            ("orderId", withdrawal_id.to_string()),
            ("startTime", start.timestamp_millis().to_string()),
            ("endTime", now.timestamp_millis().to_string()),
        ];
        let records: Vec<WithdrawalRecord> = self
            .request(Method::GET, "/api/v2/spot/wallet/withdrawal-records", &query, None)
            .await?;

        let record = records
            .into_iter()
            .find(|r| r.order_id == withdrawal_id)
            .ok_or_else(|| eyre!("Bitget has no record for withdrawal {}", withdrawal_id))?;
        Ok(parse_status(&record.status))
    }
}

fn parse_status(status: &str) -> WithdrawalState {
    match status {
        "success" => WithdrawalState::Completed,
        "fail" | "failed" | "cancel" | "rejected" => WithdrawalState::Failed(status.to_string()),
        other => WithdrawalState::Pending(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_names() {
        assert_eq!(BitgetClient::chain_name(WithdrawNetwork::Bitcoin).unwrap(), "BITCOIN");
        assert_eq!(
            BitgetClient::chain_name(WithdrawNetwork::Evm(Chain::Base)).unwrap(),
            "BASE"
        );
        assert!(BitgetClient::chain_name(WithdrawNetwork::Evm(Chain::Ethereum)).is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("success"), WithdrawalState::Completed);
        assert_eq!(parse_status("pending"), WithdrawalState::Pending("pending".into()));
        assert!(matches!(parse_status("fail"), WithdrawalState::Failed(_)));
    }

    #[test]
    fn test_records_envelope() {
        let env: Envelope<Vec<WithdrawalRecord>> = serde_json::from_str(
            r#"{"code":"00000","msg":"success","data":[{"orderId":"123","status":"pending","coin":"BTC"}]}"#,
        )
        .unwrap();
        let records = env.data.unwrap();
        assert_eq!(records[0].order_id, "123");
        assert_eq!(records[0].status, "pending");
    }
}
