//! On-disk cache storage.
//!
//! Layout: one directory per store under the root. Each entry is a single
//! `<hash>.entry` file named after the SHA-256 of the request key: one line
//! of JSON metadata (key, status line, headers, storage time), a newline,
//! then the raw body. Every write goes to its own `.part` file and is renamed
//! into place, so concurrent writers to a key never share a file and the
//! last rename wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::storage::{CacheStorage, CachedEntry};
use crate::error::{Error, Result};
use crate::http::Response;

const ENTRY_EXT: &str = "entry";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

/// Cache storage persisted under a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the default root, `$XDG_CACHE_HOME/lawnsync-worker`.
    #[must_use]
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lawnsync-worker")
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, store: &str) -> Result<PathBuf> {
        if store.is_empty()
            || store.starts_with('.')
            || store.contains(['/', '\\'])
        {
            return Err(Error::InvalidConfig(format!("invalid store name {store:?}")));
        }
        Ok(self.root.join(store))
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{:x}.{ENTRY_EXT}", Sha256::digest(key.as_bytes())))
    }
}

/// Writes `contents` to `path` via a uniquely named `.part` file and a
/// rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut part = path.as_os_str().to_owned();
    part.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    let part = PathBuf::from(part);
    if let Err(e) = tokio::fs::write(&part, contents).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    tokio::fs::rename(&part, path).await
}

/// Splits an entry file into its metadata and body.
fn decode_entry(bytes: &[u8]) -> Result<(EntryMeta, &[u8])> {
    let split = bytes
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(bytes.len());
    let meta = serde_json::from_slice(&bytes[..split])?;
    let body = bytes.get(split + 1..).unwrap_or_default();
    Ok((meta, body))
}

/// Reads a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, store: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.store_dir(store)?).await?;
        Ok(())
    }

    async fn put(&self, store: &str, key: &str, entry: CachedEntry) -> Result<()> {
        let dir = self.store_dir(store)?;
        tokio::fs::create_dir_all(&dir).await?;

        let meta = EntryMeta {
            key: key.to_string(),
            status: entry.response.status,
            status_text: entry.response.status_text,
            headers: entry.response.headers,
            stored_at: entry.stored_at,
        };

        let mut contents = serde_json::to_vec(&meta)?;
        contents.push(b'\n');
        contents.extend_from_slice(&entry.response.body);
        write_atomic(&Self::entry_path(&dir, key), &contents).await?;
        Ok(())
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<CachedEntry>> {
        let dir = self.store_dir(store)?;
        let Some(bytes) = read_optional(&Self::entry_path(&dir, key)).await? else {
            return Ok(None);
        };
        let (meta, body) = decode_entry(&bytes)?;
        if meta.key != key {
            return Ok(None);
        }

        Ok(Some(CachedEntry::stored_at(
            Response {
                status: meta.status,
                status_text: meta.status_text,
                headers: meta.headers,
                body: bytes::Bytes::copy_from_slice(body),
            },
            meta.stored_at,
        )))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn entries(&self, store: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(self.store_dir(store)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                continue;
            }
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            match decode_entry(&bytes) {
                Ok((meta, _)) => keys.push(meta.key),
                Err(e) => log::warn!("Skipping unreadable cache entry {}: {e}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, store: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.store_dir(store)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
