//! Relay bridge aggregator client

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{BridgeAggregator, BridgeConfig, BridgeQuote, BridgeStatus};
use crate::types::Chain;

pub const RELAY_API_URL: &str = "https://api.relay.link";
const REFERRER: &str = "relay.link/swap";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    enabled: bool,
    user: ConfigUser,
    solver: ConfigSolver,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUser {
    max_bridge_amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigSolver {
    capacity_per_request: String,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    steps: Vec<QuoteStep>,
    #[serde(default)]
    details: Option<QuoteDetails>,
}

#[derive(Debug, Deserialize)]
struct QuoteStep {
    #[serde(default)]
    items: Vec<QuoteItem>,
}

#[derive(Debug, Deserialize)]
struct QuoteItem {
    data: QuoteTx,
    check: Option<QuoteCheck>,
}

#[derive(Debug, Deserialize)]
struct QuoteTx {
    to: Address,
    data: Bytes,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteCheck {
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteDetails {
    #[serde(default)]
    time_estimate: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    details: Option<String>,
}

fn parse_amount(field: &str, raw: &str) -> Result<U256> {
    raw.parse::<U256>()
        .map_err(|e| eyre!("Relay {} {:?} is not an integer: {}", field, raw, e))
}

// ============================================================================
// Client
// ============================================================================

pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn decode<T: DeserializeOwned>(what: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .wrap_err_with(|| format!("Failed to read Relay {what} response"))?;
        if !status.is_success() {
            return Err(eyre!("Relay {} HTTP {}: {}", what, status, body));
        }
        debug!(what, body = %body, "Relay response");
        serde_json::from_str(&body).wrap_err_with(|| format!("Unexpected Relay {what} response: {body}"))
    }
}

#[async_trait]
impl BridgeAggregator for RelayClient {
    async fn config(&self, origin: Chain, destination: Chain, user: Address) -> Result<BridgeConfig> {
        let response = self
            .http
            .get(format!("{}/config/v2", self.base_url))
            .query(&[
                ("originChainId", origin.chain_id().to_string()),
                ("destinationChainId", destination.chain_id().to_string()),
                ("user", user.to_checksum(None)),
                ("currency", "eth".to_string()),
            ])
            .send()
            .await
            .wrap_err("Relay config request failed")?;
        let config: ConfigResponse = Self::decode("config", response).await?;

        Ok(BridgeConfig {
            enabled: config.enabled,
            user_max_amount: parse_amount("maxBridgeAmount", &config.user.max_bridge_amount)?,
            solver_capacity: parse_amount("capacityPerRequest", &config.solver.capacity_per_request)?,
        })
    }

    async fn quote(
        &self,
        origin: Chain,
        destination: Chain,
        user: Address,
        amount: U256,
    ) -> Result<Option<BridgeQuote>> {
        let payload = json!({
            "user": user.to_checksum(None),
            "originChainId": origin.chain_id(),
            "destinationChainId": destination.chain_id(),
            "originCurrency": Address::ZERO,
            "destinationCurrency": Address::ZERO,
            "amount": amount.to_string(),
            "tradeType": "EXACT_INPUT",
            "useExternalLiquidity": false,
            "referrer": REFERRER,
        });
        let response = self
            .http
            .post(format!("{}/quote", self.base_url))
            .json(&payload)
            .send()
            .await
            .wrap_err("Relay quote request failed")?;
        let quote: QuoteResponse = Self::decode("quote", response).await?;

        let Some(item) = quote.steps.into_iter().next().and_then(|s| s.items.into_iter().next()) else {
            return Ok(None);
        };
        let Some(check) = item.check else {
            return Ok(None);
        };
        let value = match item.data.value.as_deref() {
            Some(raw) if !raw.is_empty() => parse_amount("value", raw)?,
            _ => amount,
        };
        let time_estimate = quote
            .details
            .and_then(|d| d.time_estimate)
            .map(Duration::from_secs)
            .unwrap_or_default();

        Ok(Some(BridgeQuote {
            to: item.data.to,
            data: item.data.data,
            value,
            check_endpoint: check.endpoint,
            time_estimate,
        }))
    }

    async fn status(&self, check_endpoint: &str) -> Result<BridgeStatus> {
        let url = if check_endpoint.starts_with("http") {
            check_endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, check_endpoint)
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .wrap_err("Relay status request failed")?;
        let status: StatusResponse = Self::decode("status", response).await?;
        let details = status.details.unwrap_or_default();

        Ok(match status.status.as_str() {
            "success" => BridgeStatus::Success,
            "failure" => BridgeStatus::Failure(details),
            "refund" => BridgeStatus::Refund(details),
            other => BridgeStatus::Pending(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let raw = r#"{
            "enabled": true,
            "user": {"balance": "3000000000000000", "maxBridgeAmount": "2900000000000000"},
            "solver": {"address": "0xf70da97812cb96acdf810712aa562db8dfa3dbef", "balance": "1", "capacityPerRequest": "5000000000000000000"}
        }"#;
        let config: ConfigResponse = serde_json::from_str(raw).unwrap();
        assert!(config.enabled);
        assert_eq!(
            parse_amount("maxBridgeAmount", &config.user.max_bridge_amount).unwrap(),
            U256::from(2_900_000_000_000_000u64)
        );
    }

    #[test]
    fn test_parse_quote() {
        let raw = r#"{
            "steps": [{
                "id": "deposit",
                "items": [{
                    "status": "incomplete",
                    "data": {"to": "0xa5f565650890fba1824ee0f21ebbbf660a179934", "data": "0x58109c", "value": "2900000000000000", "chainId": 10},
                    "check": {"endpoint": "/intents/status?requestId=0xabc", "method": "GET"}
                }]
            }],
            "details": {"timeEstimate": 12}
        }"#;
        let quote: QuoteResponse = serde_json::from_str(raw).unwrap();
        let item = &quote.steps[0].items[0];
        assert_eq!(item.data.data.as_ref(), &[0x58, 0x10, 0x9c]);
        assert_eq!(item.check.as_ref().unwrap().endpoint, "/intents/status?requestId=0xabc");
        assert_eq!(quote.details.unwrap().time_estimate, Some(12));
    }

    #[test]
    fn test_bad_amount_is_rejected() {
        assert!(parse_amount("value", "1.5").is_err());
    }
}
