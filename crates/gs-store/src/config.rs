//! Sync Configuration Access
//!
//! Configurations are owned by an external management plane; this core only
//! reads them. Two providers: a SQLite-backed one for deployments sharing the
//! store database, and an in-memory one for tests and development seeding.

use async_trait::async_trait;
use gs_common::{SourceSystem, SyncConfig};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{Result, StoreError};

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Resolve a configuration by id. None = unknown configuration.
    async fn get(&self, config_id: &str) -> Result<Option<SyncConfig>>;

    /// Resolve the configuration owning events of a given tenant and source.
    /// Used on the processing side, where only the event is in hand.
    async fn find_for(&self, tenant_id: &str, source: SourceSystem)
        -> Result<Option<SyncConfig>>;
}

pub struct SqliteConfigProvider {
    pool: SqlitePool,
}

impl SqliteConfigProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigProvider for SqliteConfigProvider {
    async fn get(&self, config_id: &str) -> Result<Option<SyncConfig>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, source, enabled, webhook_secret, retry_limit, \
             retry_delay_secs, graph_base_url, graph_api_key \
             FROM sync_configs WHERE id = ?",
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let source_str: String = row.get("source");
        let source = SourceSystem::parse(&source_str)
            .ok_or_else(|| StoreError::InvalidSource(source_str.clone()))?;

        let retry_delay: Option<i64> = row.try_get("retry_delay_secs").ok().flatten();

        Ok(Some(SyncConfig {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            source,
            enabled: row.get::<i64, _>("enabled") != 0,
            webhook_secret: row.try_get("webhook_secret").ok().flatten(),
            retry_limit: row.try_get("retry_limit").ok().flatten(),
            retry_delay_secs: retry_delay.map(|d| d.max(0) as u64),
            graph_base_url: row.try_get("graph_base_url").ok().flatten(),
            graph_api_key: row.try_get("graph_api_key").ok().flatten(),
        }))
    }

    async fn find_for(
        &self,
        tenant_id: &str,
        source: SourceSystem,
    ) -> Result<Option<SyncConfig>> {
        let row = sqlx::query("SELECT id FROM sync_configs WHERE tenant_id = ? AND source = ? LIMIT 1")
            .bind(tenant_id)
            .bind(source.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.get(row.get::<String, _>("id").as_str()).await,
            None => Ok(None),
        }
    }
}

/// In-memory provider for tests and development.
#[derive(Default)]
pub struct InMemoryConfigProvider {
    configs: RwLock<HashMap<String, SyncConfig>>,
}

impl InMemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, config: SyncConfig) {
        self.configs.write().await.insert(config.id.clone(), config);
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn get(&self, config_id: &str) -> Result<Option<SyncConfig>> {
        Ok(self.configs.read().await.get(config_id).cloned())
    }

    async fn find_for(
        &self,
        tenant_id: &str,
        source: SourceSystem,
    ) -> Result<Option<SyncConfig>> {
        Ok(self
            .configs
            .read()
            .await
            .values()
            .find(|c| c.tenant_id == tenant_id && c.source == source)
            .cloned())
    }
}
