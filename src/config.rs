//! Operator configuration
//!
//! Process settings come from environment variables (a `.env` file is loaded
//! first when present). Accounts come from an ordered list of rows in the
//! accounts file, read with the `config` crate so TOML, JSON and YAML all
//! work. Loading is all-or-nothing: the first invalid row aborts with an error
//! naming the row and field.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::U256;
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::account::{AccountSettings, DepositAddressSource, ExchangeCredentials};
use crate::bridge::relay::RELAY_API_URL;
use crate::captcha::{CaptchaSite, ANTI_CAPTCHA_API_URL};
use crate::error::ConfigError;
use crate::exchanges::bitget::BITGET_API_URL;
use crate::exchanges::okx::OKX_API_URL;
use crate::lombard::{DEFAULT_REFERRAL_ID, LOMBARD_API_URL};
use crate::orchestrator::Thresholds;
use crate::redact::Secret;
use crate::types::{Chain, ExchangeKind, SATS_PER_BTC};
use crate::vaults::VaultRegistry;

/// Smallest `min_btc` the exchanges accept, exclusive.
const MIN_BTC_FLOOR: f64 = 0.0002;

// ============================================================================
// Process settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Anti-captcha account and the page the Lombard captcha lives on.
#[derive(Clone)]
pub struct CaptchaConfig {
    pub api_key: Secret,
    pub site: CaptchaSite,
}

impl fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaConfig")
            .field("api_key", &self.api_key)
            .field("site", &self.site)
            .finish()
    }
}

/// Base URLs of every REST API the operator talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub lombard: String,
    pub relay: String,
    pub okx: String,
    pub bitget: String,
    pub anti_captcha: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            lombard: LOMBARD_API_URL.to_string(),
            relay: RELAY_API_URL.to_string(),
            okx: OKX_API_URL.to_string(),
            bitget: BITGET_API_URL.to_string(),
            anti_captcha: ANTI_CAPTCHA_API_URL.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RunConfig {
    /// Primary endpoint first, then fallbacks.
    pub rpc_urls: HashMap<Chain, Vec<Url>>,
    pub accounts_file: PathBuf,
    pub state_file: PathBuf,
    /// Postgres store instead of the JSON file when set.
    pub database_url: Option<Secret>,
    pub captcha: Option<CaptchaConfig>,
    pub endpoints: ApiEndpoints,
    pub referral_id: String,
    /// `None` lets the gas gate wait indefinitely.
    pub gas_gate_max_wait: Option<Duration>,
    pub thresholds: Thresholds,
    pub metrics_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints: HashMap<_, _> = self.rpc_urls.iter().map(|(c, u)| (*c, u.len())).collect();
        f.debug_struct("RunConfig")
            .field("rpc_endpoints", &endpoints)
            .field("accounts_file", &self.accounts_file)
            .field("state_file", &self.state_file)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("captcha", &self.captcha)
            .field("endpoints", &self.endpoints)
            .field("referral_id", &self.referral_id)
            .field("gas_gate_max_wait", &self.gas_gate_max_wait)
            .field("thresholds", &self.thresholds)
            .field("metrics_file", &self.metrics_file)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// Default functions
fn default_accounts_file() -> PathBuf {
    PathBuf::from("accounts.toml")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("status.json")
}

fn default_gas_gate_max_wait_secs() -> u64 {
    6 * 60 * 60
}

/// Split a comma-separated list of RPC endpoints, dropping blanks.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnv { name }),
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    optional(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn eth_threshold(name: &'static str, default: U256) -> Result<U256, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => parse_ether(&raw).map_err(|e| ConfigError::InvalidEnv {
            name,
            reason: format!("{raw:?} is not an ETH amount: {e}"),
        }),
    }
}

fn rpc_urls_for(chain: Chain) -> Result<Vec<Url>, ConfigError> {
    let name = chain.rpc_env();
    let raw = required(name)?;
    let urls = parse_rpc_urls(&raw)
        .into_iter()
        .map(|u| {
            Url::parse(&u).map_err(|e| ConfigError::InvalidEnv {
                name,
                reason: format!("{u:?} is not a URL: {e}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if urls.is_empty() {
        return Err(ConfigError::MissingEnv { name });
    }
    Ok(urls)
}

impl RunConfig {
    /// Load process settings, reading `.env` first if it exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file(".env")
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            dotenvy::from_path(path).map_err(|e| ConfigError::InvalidEnv {
                name: "DOTENV",
                reason: format!("failed to load {}: {}", path.display(), e),
            })?;
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::load_from_env()
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut rpc_urls = HashMap::new();
        for chain in [Chain::Ethereum, Chain::Optimism, Chain::Base, Chain::Arbitrum] {
            rpc_urls.insert(chain, rpc_urls_for(chain)?);
        }

        let captcha = match optional("CAPTCHA_API_KEY") {
            None => None,
            Some(key) => Some(CaptchaConfig {
                api_key: Secret::new(key),
                site: CaptchaSite {
                    url: required("CAPTCHA_WEBSITE_URL")?,
                    key: required("CAPTCHA_WEBSITE_KEY")?,
                },
            }),
        };

        let defaults = ApiEndpoints::default();
        let endpoints = ApiEndpoints {
            lombard: optional("LOMBARD_API_URL").unwrap_or(defaults.lombard),
            relay: optional("RELAY_API_URL").unwrap_or(defaults.relay),
            okx: optional("OKX_API_URL").unwrap_or(defaults.okx),
            bitget: optional("BITGET_API_URL").unwrap_or(defaults.bitget),
            anti_captcha: optional("ANTI_CAPTCHA_API_URL").unwrap_or(defaults.anti_captcha),
        };

        let max_wait_secs = parsed::<u64>("GAS_GATE_MAX_WAIT_SECS")?.unwrap_or(default_gas_gate_max_wait_secs());
        let default_thresholds = Thresholds::default();

        let log_format = match optional("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    name: "LOG_FORMAT",
                    reason: format!("expected `text` or `json`, got {other:?}"),
                })
            }
        };

        let config = RunConfig {
            rpc_urls,
            accounts_file: optional("ACCOUNTS_FILE").map(PathBuf::from).unwrap_or_else(default_accounts_file),
            state_file: optional("STATE_FILE").map(PathBuf::from).unwrap_or_else(default_state_file),
            database_url: optional("DATABASE_URL").map(Secret::new),
            captcha,
            endpoints,
            referral_id: optional("LOMBARD_REFERRAL_ID").unwrap_or_else(|| DEFAULT_REFERRAL_ID.to_string()),
            gas_gate_max_wait: (max_wait_secs > 0).then(|| Duration::from_secs(max_wait_secs)),
            thresholds: Thresholds {
                l1_min_balance: eth_threshold("L1_MIN_GAS_ETH", default_thresholds.l1_min_balance)?,
                l2_min_balance: eth_threshold("L2_MIN_GAS_ETH", default_thresholds.l2_min_balance)?,
            },
            metrics_file: optional("METRICS_FILE").map(PathBuf::from),
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("LOMBARD_API_URL", &self.endpoints.lombard),
            ("RELAY_API_URL", &self.endpoints.relay),
            ("OKX_API_URL", &self.endpoints.okx),
            ("BITGET_API_URL", &self.endpoints.bitget),
            ("ANTI_CAPTCHA_API_URL", &self.endpoints.anti_captcha),
        ] {
            Url::parse(url).map_err(|e| ConfigError::InvalidEnv {
                name,
                reason: format!("{url:?} is not a URL: {e}"),
            })?;
        }

        if self.referral_id.trim().is_empty() {
            return Err(ConfigError::InvalidEnv {
                name: "LOMBARD_REFERRAL_ID",
                reason: "cannot be empty".into(),
            });
        }

        Ok(())
    }

    pub fn rpc_urls(&self, chain: Chain) -> &[Url] {
        self.rpc_urls.get(&chain).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Accounts file
// ============================================================================

/// One row of the accounts file, as written by the operator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountRow {
    pub private_key: Option<Secret>,
    pub proxy: Option<String>,
    pub max_gas_gwei: Option<u64>,
    pub exchange: Option<String>,
    pub exchange_api_key: Option<Secret>,
    pub exchange_secret_key: Option<Secret>,
    pub exchange_passphrase: Option<Secret>,
    pub generate_btc_address: Option<bool>,
    pub btc_address: Option<String>,
    pub min_btc: Option<f64>,
    pub max_btc: Option<f64>,
    pub restake: Option<bool>,
    pub vaults: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountRow>,
}

/// Read and validate every row of `path`, in file order.
pub fn load_accounts(path: &Path, vaults: &VaultRegistry) -> Result<Vec<AccountSettings>, ConfigError> {
    let path_str = path.display().to_string();
    let file: AccountsFile = ::config::Config::builder()
        .add_source(::config::File::from(path))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|source| ConfigError::AccountsFile {
            path: path_str.clone(),
            source,
        })?;

    let settings = parse_rows(&file.accounts, vaults)?;
    if settings.is_empty() {
        return Err(ConfigError::Empty { path: path_str });
    }
    info!(path = %path.display(), accounts = settings.len(), "Accounts loaded");
    Ok(settings)
}

/// Validate rows in order. Rows are numbered from 1.
pub fn parse_rows(rows: &[AccountRow], vaults: &VaultRegistry) -> Result<Vec<AccountSettings>, ConfigError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut settings = Vec::with_capacity(rows.len());

    for (index, raw) in rows.iter().enumerate() {
        let row = index + 1;
        let parsed = parse_row(row, raw, vaults)?;
        let identity = parsed.identity().to_checksum(None);
        if let Some(first) = seen.insert(identity.clone(), row) {
            return Err(ConfigError::DuplicateIdentity {
                row,
                first,
                identity,
            });
        }
        settings.push(parsed);
    }

    Ok(settings)
}

/// Every account that needs a generated address needs a captcha solver.
pub fn require_captcha(settings: &[AccountSettings], run: &RunConfig) -> Result<(), ConfigError> {
    let generates = settings
        .iter()
        .any(|s| s.deposit_address == DepositAddressSource::Generate);
    if generates && run.captcha.is_none() {
        return Err(ConfigError::MissingEnv {
            name: "CAPTCHA_API_KEY",
        });
    }
    Ok(())
}

fn invalid(row: usize, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRow {
        row,
        field,
        reason: reason.into(),
    }
}

fn secret(row: usize, field: &'static str, value: &Option<Secret>) -> Result<Secret, ConfigError> {
    match value {
        Some(s) if !s.is_empty() => Ok(Secret::new(s.expose().trim())),
        _ => Err(invalid(row, field, "is required")),
    }
}

fn btc_to_sats(btc: f64) -> u64 {
    (btc * SATS_PER_BTC as f64).round() as u64
}

fn parse_row(row: usize, raw: &AccountRow, vaults: &VaultRegistry) -> Result<AccountSettings, ConfigError> {
    let private_key = secret(row, "private_key", &raw.private_key)?;
    let signer: PrivateKeySigner = private_key
        .expose()
        .parse()
        .map_err(|_| invalid(row, "private_key", "is not a valid secp256k1 private key"))?;

    let proxy = match raw.proxy.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(p) => {
            validate_proxy(p).map_err(|reason| invalid(row, "proxy", reason))?;
            Some(p.to_string())
        }
    };

    let kind: ExchangeKind = raw
        .exchange
        .as_deref()
        .ok_or_else(|| invalid(row, "exchange", "is required"))?
        .trim()
        .parse()
        .map_err(|reason: String| invalid(row, "exchange", reason))?;

    let exchange = ExchangeCredentials {
        kind,
        api_key: secret(row, "exchange_api_key", &raw.exchange_api_key)?
            .expose()
            .to_string(),
        secret: secret(row, "exchange_secret_key", &raw.exchange_secret_key)?,
        passphrase: secret(row, "exchange_passphrase", &raw.exchange_passphrase)?,
    };

    let generate = raw
        .generate_btc_address
        .ok_or_else(|| invalid(row, "generate_btc_address", "is required"))?;
    let deposit_address = if generate {
        DepositAddressSource::Generate
    } else {
        match raw.btc_address.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => DepositAddressSource::Existing(addr.to_string()),
            _ => {
                return Err(invalid(
                    row,
                    "btc_address",
                    "is required when generate_btc_address is false",
                ))
            }
        }
    };

    let min_btc = raw.min_btc.ok_or_else(|| invalid(row, "min_btc", "is required"))?;
    if !min_btc.is_finite() || min_btc <= MIN_BTC_FLOOR {
        return Err(invalid(row, "min_btc", format!("must be greater than {MIN_BTC_FLOOR}")));
    }
    let max_btc = raw.max_btc.ok_or_else(|| invalid(row, "max_btc", "is required"))?;
    if !max_btc.is_finite() || max_btc < min_btc {
        return Err(invalid(row, "max_btc", "must be greater than or equal to min_btc"));
    }

    let restake = raw.restake.ok_or_else(|| invalid(row, "restake", "is required"))?;
    let vault = if restake {
        match raw.vaults.as_slice() {
            [name] if vaults.contains(name) => Some(name.clone()),
            [name] => {
                return Err(invalid(
                    row,
                    "vaults",
                    format!("unknown vault {name:?}, expected one of {:?}", vaults.names()),
                ))
            }
            _ => return Err(invalid(row, "vaults", "exactly one vault must be selected when restake is true")),
        }
    } else {
        if !raw.vaults.is_empty() {
            return Err(invalid(row, "vaults", "must be empty when restake is false"));
        }
        None
    };

    Ok(AccountSettings {
        signer,
        proxy,
        max_gas_gwei: raw.max_gas_gwei.filter(|g| *g > 0),
        exchange,
        deposit_address,
        min_btc_sats: btc_to_sats(min_btc),
        max_btc_sats: btc_to_sats(max_btc),
        vault,
    })
}

/// `login:password@ip:port`, with word-character credentials and an IPv4 host.
fn validate_proxy(proxy: &str) -> Result<(), String> {
    let format_error = || "must be in the format login:password@ip:port".to_string();
    let (credentials, endpoint) = proxy.split_once('@').ok_or_else(format_error)?;
    let (login, password) = credentials.split_once(':').ok_or_else(format_error)?;
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(format_error)?;

    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_word(login) || !is_word(password) {
        return Err(format_error());
    }
    host.parse::<Ipv4Addr>().map_err(|_| format_error())?;
    port.parse::<u16>().map_err(|_| format_error())?;
    Ok(())
}
