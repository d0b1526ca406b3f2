//! Lombard deposit service client
//!
//! Generates the per-account BTC deposit address and lists BTC outputs sent to
//! it, including the notarization payload and proof needed to mint LBTC.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::captcha::{CaptchaSite, CaptchaSolver};

pub const LOMBARD_API_URL: &str = "https://mainnet.prod.lombard.finance";
pub const DEFAULT_REFERRAL_ID: &str = "lombard";

const DESTINATION_CHAIN: &str = "DESTINATION_BLOCKCHAIN_ETHEREUM";
const DESTINATION_CHAIN_ID: u64 = 1;
const GENERATE_ATTEMPTS: u32 = 3;

/// Minimum captcha solver balance (USD) before asking for a solve.
pub const MIN_CAPTCHA_BALANCE: f64 = 0.0001;

/// One BTC output seen by the deposit service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DepositOutput {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub raw_payload: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    /// Present while notarization is still running.
    #[serde(default)]
    pub notarization_wait_dur: Option<serde_json::Value>,
}

impl DepositOutput {
    /// Payload and proof are both available.
    pub fn is_notarized(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.raw_payload) && present(&self.signature)
    }

    fn is_for(&self, btc_address: &str) -> bool {
        self.address.as_deref().is_some_and(|a| a == btc_address)
    }
}

/// Most recent notarized output sent to `btc_address`.
pub fn latest_notarized<'a>(outputs: &'a [DepositOutput], btc_address: &str) -> Option<&'a DepositOutput> {
    outputs
        .iter()
        .rev()
        .find(|o| o.is_for(btc_address) && o.is_notarized())
}

/// Describe what the deposit service knows about `btc_address`, for logs.
pub fn describe_pending(outputs: &[DepositOutput], btc_address: &str) -> String {
    let mine: Vec<_> = outputs.iter().filter(|o| o.is_for(btc_address)).collect();
    match mine.last() {
        None => "no deposit seen yet".to_string(),
        Some(o) if o.notarization_wait_dur.is_some() => "deposit awaiting notarization".to_string(),
        Some(_) => "deposit seen, proof not available".to_string(),
    }
}

#[async_trait]
pub trait DepositService: Send + Sync {
    /// Register a new BTC deposit address for the account.
    async fn generate_deposit_address(&self) -> Result<String>;

    /// All BTC outputs the service attributes to the account.
    async fn deposits(&self) -> Result<Vec<DepositOutput>>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct OutputsResponse {
    #[serde(default)]
    outputs: Vec<DepositOutput>,
}

pub struct LombardClient {
    http: reqwest::Client,
    base_url: String,
    signer: PrivateKeySigner,
    referral_id: String,
    captcha: Option<(Arc<dyn CaptchaSolver>, CaptchaSite)>,
}

impl LombardClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        signer: PrivateKeySigner,
        referral_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            referral_id: referral_id.into(),
            captcha: None,
        }
    }

    /// Enable address generation. Listing deposits works without a solver.
    pub fn with_captcha(mut self, solver: Arc<dyn CaptchaSolver>, site: CaptchaSite) -> Self {
        self.captcha = Some((solver, site));
        self
    }

    /// Personal-sign proof that the account owns the destination address.
    fn destination_signature(&self) -> Result<String> {
        let message = format!("destination chain id is {DESTINATION_CHAIN_ID}");
        let signature = self
            .signer
            .sign_message_sync(message.as_bytes())
            .wrap_err("Failed to sign destination message")?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

#[async_trait]
impl DepositService for LombardClient {
    async fn generate_deposit_address(&self) -> Result<String> {
        let (solver, site) = self
            .captcha
            .as_ref()
            .ok_or_else(|| eyre!("Address generation needs a captcha solver (CAPTCHA_API_KEY)"))?;
        let balance = solver.balance().await?;
        if balance < MIN_CAPTCHA_BALANCE {
            return Err(eyre!(
                "captcha solver balance {} is below the required {}",
                balance,
                MIN_CAPTCHA_BALANCE
            ));
        }
        debug!(balance, "Captcha solver balance sufficient");

        let signature = self.destination_signature()?;
        let url = format!("{}/api/v1/address/generate", self.base_url);

        for attempt in 1..=GENERATE_ATTEMPTS {
            let captcha = solver.solve(site).await?;
            let payload = json!({
                "captcha": captcha,
                "nonce": "0",
                "referral_id": self.referral_id,
                "to_address": self.signer.address().to_checksum(None),
                "to_address_signature": signature,
                "to_chain": DESTINATION_CHAIN,
            });

            let response = self
                .http
                .post(&url)
                .json(&payload)
                .send()
                .await
                .wrap_err("Lombard address generation request failed")?;
            let status = response.status();
            let body = response.text().await.wrap_err("Failed to read Lombard response")?;

            if status.is_success() {
                let generated: GenerateResponse = serde_json::from_str(&body)
                    .wrap_err_with(|| format!("Unexpected Lombard response: {body}"))?;
                info!(btc_address = %generated.address, "Deposit address generated");
                return Ok(generated.address);
            }
            if status == StatusCode::UNAUTHORIZED && body.contains("bad captcha") {
                warn!(attempt, max = GENERATE_ATTEMPTS, "Captcha rejected, solving a new one");
                continue;
            }
            return Err(eyre!("Lombard address generation failed: HTTP {}: {}", status, body));
        }

        Err(eyre!(
            "Lombard rejected the captcha {} times in a row",
            GENERATE_ATTEMPTS
        ))
    }

    async fn deposits(&self) -> Result<Vec<DepositOutput>> {
        let url = format!(
            "{}/api/v1/address/outputs/{}",
            self.base_url,
            self.signer.address().to_checksum(None)
        );
        let response: OutputsResponse = self
            .http
            .get(&url)
            .send()
            .await
            .wrap_err("Lombard outputs request failed")?
            .error_for_status()
            .wrap_err("Lombard outputs returned an error status")?
            .json()
            .await
            .wrap_err("Lombard outputs returned malformed JSON")?;
        debug!(count = response.outputs.len(), "Deposit outputs fetched");
        Ok(response.outputs)
    }
}
