//! Account state persistence
//!
//! The store maps an account identity to its [`AccountRecord`]. Two backends:
//! a JSON file (default) and PostgreSQL when `DATABASE_URL` is set. Any store
//! failure aborts the run.

pub mod json;
pub mod postgres;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::account::AccountRecord;
use crate::error::StoreError;

pub use json::JsonFileStore;
pub use postgres::PgStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persisted record for `identity`, if any.
    async fn load(&self, identity: &Address) -> Result<Option<AccountRecord>, StoreError>;

    /// Durably replace the record for `identity`.
    async fn save(&self, identity: &Address, record: &AccountRecord) -> Result<(), StoreError>;
}

/// Stable textual key for an identity (EIP-55 checksummed).
pub fn identity_key(identity: &Address) -> String {
    identity.to_checksum(None)
}
