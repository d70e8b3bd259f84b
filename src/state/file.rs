//! # Directory-backed State Store
//!
//! Each key is stored as `{root}/{key}.json`. Key segments become directories,
//! so listing a prefix is a directory walk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::StateStore;

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("invalid state key '{key}'");
        }
        Ok(self.root.join(format!("{key}.{EXTENSION}")))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let key = relative.to_str()?.strip_suffix(&format!(".{EXTENSION}"))?;
        Some(key.replace(std::path::MAIN_SEPARATOR, "/"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(format!("Failed to read: {}", path.display()));
            }
        };
        let value = serde_json::from_str(&content)
            .context(format!("Failed to parse state: {}", path.display()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, content)
            .await
            .context(format!("Failed to write: {}", path.display()))?;
        debug!("Stored state key {key}");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let store = self.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys: Vec<String> = WalkDir::new(&store.root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| store.key_for(entry.path()))
                .filter(|key| key.starts_with(&prefix))
                .collect();
            keys.sort();
            keys
        })
        .await
        .context("State listing task failed")
    }
}
