//! JSON file store
//!
//! The whole map lives in memory and is rewritten on every save: serialize to
//! a sibling temp file, fsync, then rename over the target. Readers never see
//! a half-written file.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{identity_key, StateStore};
use crate::account::AccountRecord;
use crate::error::StoreError;
use crate::retry::{with_retry, RetryPolicy};

pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, AccountRecord>>,
    retry: RetryPolicy,
}

impl JsonFileStore {
    /// Open `path`, creating an empty store when the file does not exist.
    ///
    /// A file that exists but does not parse (including an unknown status
    /// value) is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        info!(path = %path.display(), accounts = records.len(), "State file loaded");
        Ok(Self {
            path,
            records: Mutex::new(records),
            retry: RetryPolicy::for_store(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_atomically(&self, body: &[u8]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, identity: &Address) -> Result<Option<AccountRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&identity_key(identity)).cloned())
    }

    async fn save(&self, identity: &Address, record: &AccountRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(identity_key(identity), record.clone());
        let body = serde_json::to_vec_pretty(&next)?;

        with_retry(&self.retry, "state file write", |_| self.write_atomically(&body)).await?;
        *records = next;
        debug!(identity = %identity, status = %record.status, "State persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountStatus;

    fn identity(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("status.json")).await.unwrap();
        assert!(store.load(&identity(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_record_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let mut record = AccountRecord::default();
        record.status = AccountStatus::DepositInitiated;
        record.derived_address = Some("bc1qexample".into());
        record.withdrawal_id = Some("w-1".into());
        store.save(&identity(1), &record).await.unwrap();
        store.save(&identity(2), &AccountRecord::default()).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let loaded = reopened.load(&identity(1)).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(
            reopened.load(&identity(2)).await.unwrap().unwrap().status,
            AccountStatus::Init
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("missing").join("status.json"))
            .await
            .unwrap();

        let mut record = AccountRecord::default();
        record.status = AccountStatus::AddressGenerated;
        assert!(store.save(&identity(1), &record).await.is_err());
        assert!(store.load(&identity(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_status_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let key = identity_key(&identity(7));
        std::fs::write(&path, format!(r#"{{"{key}": {{"status": "HALF_MINTED"}}}}"#)).unwrap();

        let err = JsonFileStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.to_string().contains("HALF_MINTED"));
    }

    #[tokio::test]
    async fn test_truncated_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, r#"{"0xabc": {"status": "INIT""#).unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}
