//! Persistence layer.
//!
//! The core only needs whole-collection replace semantics: load every
//! item, or overwrite the collection with a new list. Two backends:
//! a JSON file per collection, and a SQLite table holding one JSON
//! payload per named collection.

pub mod sqlite;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::ScoutError;

pub use sqlite::SqliteStore;

/// Opaque load-all / save-all store for one collection.
#[async_trait]
pub trait CollectionStore<T>: Send + Sync {
    async fn load_all(&self) -> Result<Vec<T>, ScoutError>;
    async fn save_all(&self, items: &[T]) -> Result<(), ScoutError>;
}

fn persistence(e: anyhow::Error) -> ScoutError {
    ScoutError::Persistence(format!("{e:#}"))
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

/// Stores a collection as a pretty-printed JSON array in one file.
///
/// Writes go to a sibling temp file first and are renamed into place,
/// so a crash mid-write leaves the previous collection intact.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file (for testing or reset).
    pub async fn delete(&self) -> Result<(), ScoutError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.path)
                .await
                .with_context(|| format!("Failed to delete {}", self.path.display()))
                .map_err(persistence)?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> CollectionStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load_all(&self) -> Result<Vec<T>, ScoutError> {
        let path = self.path.display().to_string();
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            info!(path, "No saved collection found, starting empty");
            return Ok(Vec::new());
        }

        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read collection from {path}"))
            .map_err(persistence)?;

        let items: Vec<T> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse collection from {path}"))
            .map_err(persistence)?;

        debug!(path, count = items.len(), "Collection loaded");
        Ok(items)
    }

    async fn save_all(&self, items: &[T]) -> Result<(), ScoutError> {
        let path = self.path.display().to_string();
        let json = serde_json::to_string_pretty(items)
            .context("Failed to serialise collection")
            .map_err(persistence)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))
                .map_err(persistence)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write collection to {path}"))
            .map_err(persistence)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move collection into {path}"))
            .map_err(persistence)?;

        debug!(path, count = items.len(), "Collection saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
