//! PostgreSQL store
//!
//! One row per account; the record is stored as JSON text next to a status
//! column for ad-hoc queries. Saves are single upserts.

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use super::{identity_key, StateStore};
use crate::account::AccountRecord;
use crate::error::StoreError;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and migrate.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn load(&self, identity: &Address) -> Result<Option<AccountRecord>, StoreError> {
        let key = identity_key(identity);
        let row = sqlx::query("SELECT record FROM account_state WHERE identity = $1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("record");
                let record = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                    path: format!("account_state[{key}]"),
                    reason: e.to_string(),
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, identity: &Address, record: &AccountRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO account_state (identity, status, record, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity) DO UPDATE
            SET status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(identity_key(identity))
        .bind(record.status.as_str())
        .bind(body)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
