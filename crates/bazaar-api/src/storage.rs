use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use tokio::fs;
use tracing::info;

/// Disk-backed stand-in for the object-storage collaborator: accepts a byte
/// buffer and a logical path, returns a public URL (or fails).
#[derive(Clone)]
pub struct Storage {
    dir: PathBuf,
    public_base: String,
}

impl Storage {
    pub async fn new(dir: PathBuf, public_base: &str) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    /// Store `data` under the logical `path` and return its public URL.
    /// The path must be relative with no parent components.
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<String> {
        if path.is_empty()
            || Path::new(path)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid storage path: {}", path);
        }

        let dest = self.dir.join(path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dest, data).await?;

        Ok(format!("{}/{}", self.public_base, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage(tag: &str) -> Storage {
        let dir = std::env::temp_dir().join(format!("bazaar_storage_test_{}", tag));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Storage::new(dir, "https://cdn.example").await.unwrap()
    }

    #[tokio::test]
    async fn put_writes_and_returns_public_url() {
        let storage = test_storage("put").await;
        let url = storage.put("messages/7/1.png", b"png-bytes").await.unwrap();
        assert_eq!(url, "https://cdn.example/messages/7/1.png");

        let stored = fs::read(storage.dir.join("messages/7/1.png")).await.unwrap();
        assert_eq!(stored, b"png-bytes");
    }

    #[tokio::test]
    async fn put_rejects_traversal_paths() {
        let storage = test_storage("traversal").await;
        assert!(storage.put("../evil.png", b"x").await.is_err());
        assert!(storage.put("/abs.png", b"x").await.is_err());
        assert!(storage.put("", b"x").await.is_err());
    }
}
