//! Collaborators backed by the real APIs.

use eyre::Result;
use std::sync::Arc;

use super::Services;
use crate::account::AccountSettings;
use crate::bridge::{BridgeAggregator, RelayClient};
use crate::captcha::{AntiCaptchaClient, CaptchaSite, CaptchaSolver};
use crate::chain::evm::{http_client, EvmChainClient};
use crate::chain::ChainClient;
use crate::config::RunConfig;
use crate::exchanges::{BitgetClient, Exchange, OkxClient};
use crate::lombard::{DepositService, LombardClient};
use crate::types::{Chain, ExchangeKind};

pub struct LiveServices {
    config: RunConfig,
    captcha: Option<(Arc<dyn CaptchaSolver>, CaptchaSite)>,
}

impl LiveServices {
    pub fn new(config: RunConfig) -> Result<Self> {
        let captcha = match &config.captcha {
            Some(c) => {
                let solver: Arc<dyn CaptchaSolver> = Arc::new(AntiCaptchaClient::new(
                    http_client(None)?,
                    config.endpoints.anti_captcha.clone(),
                    c.api_key.clone(),
                ));
                Some((solver, c.site.clone()))
            }
            None => None,
        };
        Ok(Self { config, captcha })
    }
}

impl Services for LiveServices {
    fn chain(&self, settings: &AccountSettings, chain: Chain) -> Result<Arc<dyn ChainClient>> {
        let client = EvmChainClient::connect(
            chain,
            self.config.rpc_urls(chain),
            settings.signer.clone(),
            settings.proxy.as_deref(),
        )?;
        Ok(Arc::new(client))
    }

    /// Exchange API keys are usually IP-whitelisted, so these calls skip the proxy.
    fn exchange(&self, settings: &AccountSettings) -> Result<Arc<dyn Exchange>> {
        let http = http_client(None)?;
        let credentials = settings.exchange.clone();
        let exchange: Arc<dyn Exchange> = match credentials.kind {
            ExchangeKind::Okx => Arc::new(OkxClient::new(http, self.config.endpoints.okx.clone(), credentials)),
            ExchangeKind::Bitget => Arc::new(BitgetClient::new(http, self.config.endpoints.bitget.clone(), credentials)),
        };
        Ok(exchange)
    }

    fn deposits(&self, settings: &AccountSettings) -> Result<Arc<dyn DepositService>> {
        let mut client = LombardClient::new(
            http_client(settings.proxy.as_deref())?,
            self.config.endpoints.lombard.clone(),
            settings.signer.clone(),
            self.config.referral_id.clone(),
        );
        if let Some((solver, site)) = &self.captcha {
            client = client.with_captcha(solver.clone(), site.clone());
        }
        Ok(Arc::new(client))
    }

    fn bridge(&self, settings: &AccountSettings) -> Result<Arc<dyn BridgeAggregator>> {
        Ok(Arc::new(RelayClient::new(
            http_client(settings.proxy.as_deref())?,
            self.config.endpoints.relay.clone(),
        )))
    }
}
