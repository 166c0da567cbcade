//! Connection pool wrapper over `deadpool-postgres`, grounded on the
//! teacher's `store` crate choice of `tokio-postgres` + `deadpool-postgres`
//! for its own `postgres` backend feature.

use common::config::Config;
use common::error::{MailError, MailResult};
use deadpool_postgres::{Config as PoolConfig, Pool as InnerPool, Runtime};
use tokio_postgres::NoTls;

use crate::schema::SCHEMA;

#[derive(Clone)]
pub struct Pool {
    inner: InnerPool,
}

impl Pool {
    pub fn connect(config: &Config) -> MailResult<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(config.database.url.clone());
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(
            config.database.max_connections as usize,
        ));
        let inner = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| MailError::Database(e.to_string()))?;
        Ok(Pool { inner })
    }

    pub async fn get(&self) -> MailResult<deadpool_postgres::Client> {
        self.inner
            .get()
            .await
            .map_err(|e| MailError::Database(e.to_string()))
    }

    /// Applies the schema (spec §6). Idempotent — every statement is
    /// `CREATE TABLE IF NOT EXISTS`.
    pub async fn migrate(&self) -> MailResult<()> {
        let client = self.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| MailError::Database(e.to_string()))?;
        Ok(())
    }
}
