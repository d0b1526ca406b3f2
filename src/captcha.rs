//! Captcha solving through the anti-captcha.com REST API
//!
//! Only reCAPTCHA v2 without proxy is needed: the deposit-address endpoint is
//! gated by one.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::confirmation::{poll_until, PollOutcome, PollSchedule};
use crate::redact::Secret;

pub const ANTI_CAPTCHA_API_URL: &str = "https://api.anti-captcha.com";

/// Page the captcha is embedded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSite {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve a captcha for `site` and return the response token.
    async fn solve(&self, site: &CaptchaSite) -> Result<String>;

    /// Remaining solver balance in USD.
    async fn balance(&self) -> Result<f64>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    task_id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<Solution>,
    #[serde(default)]
    balance: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Solution {
    g_recaptcha_response: String,
}

pub struct AntiCaptchaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Secret,
    schedule: PollSchedule,
}

impl AntiCaptchaClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Secret) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            schedule: PollSchedule::fixed(Duration::from_secs(5), 60),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<ApiResponse> {
        let url = format!("{}/{}", self.base_url, method);
        let response: ApiResponse = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .wrap_err_with(|| format!("anti-captcha {method} request failed"))?
            .error_for_status()
            .wrap_err_with(|| format!("anti-captcha {method} returned an error status"))?
            .json()
            .await
            .wrap_err_with(|| format!("anti-captcha {method} returned malformed JSON"))?;

        if response.error_id != 0 {
            return Err(eyre!(
                "anti-captcha {} error {}: {}",
                method,
                response.error_id,
                response.error_description.as_deref().unwrap_or("no description")
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl CaptchaSolver for AntiCaptchaClient {
    async fn solve(&self, site: &CaptchaSite) -> Result<String> {
        let created = self
            .call(
                "createTask",
                json!({
                    "clientKey": self.api_key.expose(),
                    "task": {
                        "type": "RecaptchaV2TaskProxyless",
                        "websiteURL": site.url,
                        "websiteKey": site.key,
                    }
                }),
            )
            .await?;
        let task_id = created
            .task_id
            .ok_or_else(|| eyre!("anti-captcha createTask returned no taskId"))?;
        debug!(task_id, "Captcha task created");

        let token = poll_until("captcha solution", &self.schedule, |_| async move {
            let result = self
                .call(
                    "getTaskResult",
                    json!({ "clientKey": self.api_key.expose(), "taskId": task_id }),
                )
                .await?;
            match (result.status.as_deref(), result.solution) {
                (Some("ready"), Some(solution)) => Ok(PollOutcome::Ready(solution.g_recaptcha_response)),
                (status, _) => Ok(PollOutcome::Pending(status.unwrap_or("unknown").to_string())),
            }
        })
        .await
        .map_err(|e| eyre!("captcha task {} not solved: {}", task_id, e))?;

        info!(task_id, "Captcha solved");
        Ok(token)
    }

    async fn balance(&self) -> Result<f64> {
        let response = self
            .call("getBalance", json!({ "clientKey": self.api_key.expose() }))
            .await?;
        response
            .balance
            .ok_or_else(|| eyre!("anti-captcha getBalance returned no balance"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ready_result() {
        let r: ApiResponse = serde_json::from_str(
            r#"{"errorId":0,"status":"ready","solution":{"gRecaptchaResponse":"03AGdBq2"},"cost":"0.00200"}"#,
        )
        .unwrap();
        assert_eq!(r.status.as_deref(), Some("ready"));
        assert_eq!(r.solution.unwrap().g_recaptcha_response, "03AGdBq2");
    }

    #[test]
    fn test_parse_error_response() {
        let r: ApiResponse = serde_json::from_str(
            r#"{"errorId":1,"errorCode":"ERROR_KEY_DOES_NOT_EXIST","errorDescription":"Account authorization key not found"}"#,
        )
        .unwrap();
        assert_eq!(r.error_id, 1);
        assert!(r.error_description.unwrap().contains("authorization"));
    }
}
