//! Gas-price gate
//!
//! Holds a submission back while the chain's gas price is above the account's
//! ceiling. The gate only waits; the submitting code reads a fresh price
//! afterwards.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::error::FlowError;
use crate::types::WEI_PER_GWEI;

#[derive(Debug, Clone)]
pub struct GasGate {
    pub poll_interval: Duration,
    /// Give up after this long above the ceiling. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for GasGate {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_wait: Some(Duration::from_secs(6 * 60 * 60)),
        }
    }
}

impl GasGate {
    pub fn new(poll_interval: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }

    /// Return once the gas price is at or below `ceiling_gwei`.
    ///
    /// With no ceiling this returns without touching the chain.
    pub async fn await_acceptable_price(
        &self,
        client: &dyn ChainClient,
        ceiling_gwei: Option<u64>,
    ) -> Result<(), FlowError> {
        let Some(ceiling_gwei) = ceiling_gwei else {
            return Ok(());
        };
        let ceiling_wei = u128::from(ceiling_gwei) * WEI_PER_GWEI;
        let started = Instant::now();

        loop {
            let price = client.gas_price().await?;
            if price <= ceiling_wei {
                debug!(chain = %client.chain(), price_gwei = price / WEI_PER_GWEI, ceiling_gwei, "Gas price acceptable");
                crate::metrics::observe_gas_wait(client.chain(), started.elapsed());
                return Ok(());
            }

            let waited = started.elapsed();
            if let Some(max_wait) = self.max_wait {
                if waited + self.poll_interval > max_wait {
                    return Err(FlowError::GasPriceTimeout {
                        chain: client.chain().to_string(),
                        ceiling_gwei,
                        waited_secs: waited.as_secs(),
                    });
                }
            }

            info!(
                chain = %client.chain(),
                price_gwei = price / WEI_PER_GWEI,
                ceiling_gwei,
                waited_secs = waited.as_secs(),
                "Gas price above ceiling, waiting"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
