//! Secret readers: a directory tree of `{path}/{field}` files and an
//! in-memory map.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::model::SecretRef;
use crate::providers::SecretReader;

/// Reads secrets mounted as files, e.g. by a vault agent sidecar
#[derive(Debug, Clone)]
pub struct FileSecretReader {
    root: PathBuf,
}

impl FileSecretReader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn secret_path(&self, secret: &SecretRef) -> Result<PathBuf> {
        let relative = Path::new(secret.path.trim_start_matches('/')).join(&secret.field);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(anyhow!(
                "Secret path escapes the secrets directory: {}",
                relative.display()
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SecretReader for FileSecretReader {
    async fn read(&self, secret: &SecretRef) -> Result<String> {
        let path = self.secret_path(secret)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .context(format!("Failed to read secret: {}", path.display()))?;
        Ok(content.trim_end().to_string())
    }
}

/// Secrets held in memory, keyed by `(path, field)`
#[derive(Debug, Clone, Default)]
pub struct MapSecretReader {
    secrets: HashMap<(String, String), String>,
}

impl MapSecretReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(
        mut self,
        path: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets
            .insert((path.into(), field.into()), value.into());
        self
    }
}

#[async_trait]
impl SecretReader for MapSecretReader {
    async fn read(&self, secret: &SecretRef) -> Result<String> {
        self.secrets
            .get(&(secret.path.clone(), secret.field.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("Secret {}/{} not found", secret.path, secret.field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_ref(path: &str, field: &str) -> SecretRef {
        SecretRef {
            path: path.to_string(),
            field: field.to_string(),
            version: None,
            format: None,
        }
    }

    #[tokio::test]
    async fn test_file_secret_reader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app/db")).unwrap();
        std::fs::write(dir.path().join("app/db/password"), "hunter2\n").unwrap();

        let reader = FileSecretReader::new(dir.path());
        assert_eq!(
            reader.read(&secret_ref("/app/db", "password")).await.unwrap(),
            "hunter2"
        );
        assert!(reader.read(&secret_ref("app/db", "user")).await.is_err());
        assert!(reader.read(&secret_ref("../etc", "passwd")).await.is_err());
    }

    #[tokio::test]
    async fn test_map_secret_reader() {
        let reader = MapSecretReader::new().with_secret("app/db", "password", "hunter2");
        assert_eq!(
            reader.read(&secret_ref("app/db", "password")).await.unwrap(),
            "hunter2"
        );
        assert!(reader.read(&secret_ref("app/db", "user")).await.is_err());
    }
}
