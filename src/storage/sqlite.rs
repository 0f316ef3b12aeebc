//! SQLite collection backend.
//!
//! One row per named collection holding the whole list as JSON, which
//! mirrors a document store's "single document per collection" layout
//! and keeps replace-all atomic without partial-update support.

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::marker::PhantomData;
use std::str::FromStr;
use tracing::debug;

use super::{persistence, CollectionStore};
use crate::types::ScoutError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// A named collection inside a shared SQLite database.
#[derive(Clone)]
pub struct SqliteStore<T> {
    pool: SqlitePool,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SqliteStore<T> {
    /// Open (or create) the database and ensure the schema exists.
    pub async fn connect(database_url: &str, name: &str) -> Result<Self, ScoutError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid SQLite URL: {database_url}"))
            .map_err(persistence)?
            .create_if_missing(true);

        // a single connection keeps `sqlite::memory:` databases shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database {database_url}"))
            .map_err(persistence)?;

        Self::with_pool(pool, name).await
    }

    /// Use an existing pool, e.g. to keep several collections in one file.
    pub async fn with_pool(pool: SqlitePool, name: &str) -> Result<Self, ScoutError> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create collections table")
            .map_err(persistence)?;

        Ok(Self {
            pool,
            name: name.to_string(),
            _marker: PhantomData,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl<T> CollectionStore<T> for SqliteStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load_all(&self) -> Result<Vec<T>, ScoutError> {
        let payload: Option<String> =
            sqlx::query_scalar::<_, String>("SELECT payload FROM collections WHERE name = ?")
                .bind(&self.name)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to load collection {}", self.name))
                .map_err(persistence)?;

        let Some(payload) = payload else {
            return Ok(Vec::new());
        };

        let items: Vec<T> = serde_json::from_str(&payload)
            .with_context(|| format!("Failed to parse collection {}", self.name))
            .map_err(persistence)?;

        debug!(collection = %self.name, count = items.len(), "Collection loaded");
        Ok(items)
    }

    async fn save_all(&self, items: &[T]) -> Result<(), ScoutError> {
        let payload = serde_json::to_string(items)
            .context("Failed to serialise collection")
            .map_err(persistence)?;

        sqlx::query(
            "INSERT INTO collections (name, payload, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(&self.name)
        .bind(payload)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save collection {}", self.name))
        .map_err(persistence)?;

        debug!(collection = %self.name, count = items.len(), "Collection saved");
        Ok(())
    }
}
