//! LBTC operator - Library interface
//!
//! Re-exports internal modules for use by the binary and integration tests.

pub mod account;
pub mod bridge;
pub mod captcha;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod exchanges;
pub mod gas;
pub mod lombard;
pub mod metrics;
pub mod orchestrator;
pub mod redact;
pub mod retry;
pub mod store;
pub mod types;
pub mod vaults;
