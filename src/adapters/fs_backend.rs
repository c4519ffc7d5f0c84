//! Filesystem tier backend
//!
//! Persistent store that survives restarts of the host process.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   static/
//!     3f2a9c0d1e4b5a67.entry   [u32 meta length][meta JSON][raw body]
//!   api/
//!     ...
//! ```
//!
//! File stems are the key fingerprint; the metadata holds url, status,
//! headers and `stored_at`. Every write goes to its own uniquely named
//! temporary file in the tier directory, and a single rename commits it.
//! Concurrent writers of one key never share a temporary file and the last
//! rename wins. Renames are serialized with the size index so the byte
//! quota and statistics see every commit exactly once.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::entry::{CachedEntry, CachedResponse, ResourceKey};
use crate::domain::ports::{BackendStats, TierBackend};
use crate::error::{Error, Result};

const ENTRY_EXT: &str = "entry";
const TMP_EXT: &str = "tmp";

/// Length prefix of the metadata block
const HEADER_LEN: usize = 4;

/// On-disk metadata record
#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
    size: u64,
}

fn encode(meta: &StoredMeta, body: &[u8]) -> Result<Vec<u8>> {
    let meta = serde_json::to_vec(meta)?;
    let len = u32::try_from(meta.len())
        .map_err(|_| Error::Internal("cache metadata too large".to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + meta.len() + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(body);
    Ok(buf)
}

fn decode(tier: &str, raw: Vec<u8>) -> Result<(StoredMeta, Bytes)> {
    let raw = Bytes::from(raw);
    let meta_end = meta_len(tier, &raw)?
        .checked_add(HEADER_LEN)
        .filter(|end| *end <= raw.len())
        .ok_or_else(|| Error::storage(tier, "truncated cache entry"))?;
    let meta = serde_json::from_slice(&raw[HEADER_LEN..meta_end])?;
    Ok((meta, raw.slice(meta_end..)))
}

fn meta_len(tier: &str, header: &[u8]) -> Result<usize> {
    let prefix: [u8; HEADER_LEN] = header
        .get(..HEADER_LEN)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| Error::storage(tier, "truncated cache entry header"))?;
    Ok(u32::from_be_bytes(prefix) as usize)
}

/// Directory-per-tier persistent backend
pub struct FsTierBackend {
    root: PathBuf,
    /// Maximum total body bytes (None = unbounded)
    quota_bytes: Option<u64>,
    /// Committed entry file -> body size
    sizes: DashMap<PathBuf, u64>,
    /// Serializes commits and tier deletes against `sizes`
    commit: Mutex<()>,
    entry_count: AtomicU64,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    tier_deletes: AtomicU64,
}

impl FsTierBackend {
    /// Open (creating if needed) an unbounded store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_quota(root, None).await
    }

    /// Open a store that rejects writes beyond `quota_bytes` of body data
    pub async fn open_with_quota(
        root: impl Into<PathBuf>,
        quota_bytes: Option<u64>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let backend = Self {
            root,
            quota_bytes,
            sizes: DashMap::new(),
            commit: Mutex::new(()),
            entry_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            tier_deletes: AtomicU64::new(0),
        };

        // Index whatever a previous process left behind
        for tier in backend.tier_names().await? {
            for (path, meta) in backend.tier_metas(&tier, true).await? {
                backend.sizes.insert(path, meta.size);
                backend.entry_count.fetch_add(1, Ordering::Relaxed);
                backend.total_bytes.fetch_add(meta.size, Ordering::Relaxed);
            }
        }

        debug!(
            "Opened filesystem tier backend at {} ({} entries, quota {:?})",
            backend.root.display(),
            backend.entry_count.load(Ordering::Relaxed),
            backend.quota_bytes
        );
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tier_dir(&self, tier: &str) -> Result<PathBuf> {
        let valid = !tier.is_empty()
            && tier != "."
            && tier != ".."
            && tier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::storage(tier, "tier name is not a safe directory name"));
        }
        Ok(self.root.join(tier))
    }

    fn entry_path(&self, tier: &str, key: &ResourceKey) -> Result<PathBuf> {
        let stem = format!("{:016x}", key.fingerprint());
        Ok(self.tier_dir(tier)?.join(format!("{stem}.{ENTRY_EXT}")))
    }

    /// Read only the metadata block of an entry file
    async fn read_meta(tier: &str, path: &Path) -> Result<Option<StoredMeta>> {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).await?;
        let mut meta = vec![0u8; meta_len(tier, &header)?];
        file.read_exact(&mut meta).await?;
        Ok(Some(serde_json::from_slice(&meta)?))
    }

    /// Metadata of every committed entry in a tier.
    ///
    /// With `sweep`, temporary files left by an interrupted write are removed.
    async fn tier_metas(&self, tier: &str, sweep: bool) -> Result<Vec<(PathBuf, StoredMeta)>> {
        let dir = self.tier_dir(tier)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        while let Some(dirent) = entries.next_entry().await? {
            let path = dirent.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(ENTRY_EXT) => match Self::read_meta(tier, &path).await {
                    Ok(Some(meta)) => metas.push((path, meta)),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable cache entry {}: {}", path.display(), e),
                },
                Some(TMP_EXT) if sweep => {
                    if let Err(e) = fs::remove_file(&path).await {
                        warn!("Failed to remove stale temporary file {}: {}", path.display(), e);
                    }
                }
                _ => {}
            }
        }
        Ok(metas)
    }

    /// Rename `tmp` over `path` and account for it, or reject it over quota
    async fn commit_entry(
        &self,
        tmp: &Path,
        path: &Path,
        size: u64,
        key: &ResourceKey,
    ) -> Result<()> {
        let _guard = self.commit.lock().await;
        let replaced = self.sizes.get(path).map(|s| *s);

        if let Some(quota) = self.quota_bytes {
            let projected = self
                .total_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(replaced.unwrap_or(0))
                + size;
            if projected > quota {
                return Err(Error::QuotaExceeded(format!(
                    "storing {} bytes for {} would exceed quota of {} bytes",
                    size, key, quota
                )));
            }
        }

        fs::rename(tmp, path).await?;
        self.sizes.insert(path.to_path_buf(), size);
        match replaced {
            Some(old) => {
                self.total_bytes.fetch_sub(old, Ordering::Relaxed);
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::Relaxed);
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn pairs_to_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

#[async_trait]
impl TierBackend for FsTierBackend {
    async fn get(&self, tier: &str, key: &ResourceKey) -> Result<Option<CachedEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let path = self.entry_path(tier, key)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (meta, body) = decode(tier, raw)?;

        // Fingerprint collision: a different URL owns this slot
        if meta.url != key.as_str() {
            return Ok(None);
        }

        let status = StatusCode::from_u16(meta.status)
            .map_err(|e| Error::storage(tier, format!("corrupt status for {key}: {e}")))?;

        let response = CachedResponse {
            status,
            headers: pairs_to_headers(&meta.headers),
            body,
        };
        Ok(Some(CachedEntry::new(key.clone(), response, meta.stored_at)))
    }

    async fn put(&self, tier: &str, entry: CachedEntry) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let dir = self.tier_dir(tier)?;
        fs::create_dir_all(&dir).await?;

        let path = self.entry_path(tier, &entry.key)?;
        let meta = StoredMeta {
            url: entry.key.as_str().to_string(),
            status: entry.response.status.as_u16(),
            headers: headers_to_pairs(&entry.response.headers),
            stored_at: entry.stored_at,
            size: entry.size(),
        };
        let data = encode(&meta, &entry.response.body)?;

        let tmp = dir.join(format!("{}.{TMP_EXT}", Uuid::new_v4().simple()));
        fs::write(&tmp, &data).await?;

        let committed = self.commit_entry(&tmp, &path, meta.size, &entry.key).await;
        if committed.is_err() {
            if let Err(e) = fs::remove_file(&tmp).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove temporary file {}: {}", tmp.display(), e);
                }
            }
        }
        committed
    }

    async fn keys(&self, tier: &str) -> Result<Vec<ResourceKey>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let mut keys = Vec::new();
        for (_, meta) in self.tier_metas(tier, false).await? {
            match ResourceKey::parse(&meta.url) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("Skipping cache entry with invalid URL in {}: {}", tier, e),
            }
        }
        Ok(keys)
    }

    async fn tier_names(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(dirent) = entries.next_entry().await? {
            if dirent.file_type().await?.is_dir() {
                if let Some(name) = dirent.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool> {
        let dir = self.tier_dir(tier)?;
        let _guard = self.commit.lock().await;

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::storage(tier, e)),
        }

        let mut count = 0;
        let mut bytes = 0;
        self.sizes.retain(|path, size| {
            if path.starts_with(&dir) {
                count += 1;
                bytes += *size;
                false
            } else {
                true
            }
        });
        self.tier_deletes.fetch_add(1, Ordering::Relaxed);
        self.entry_count.fetch_sub(count, Ordering::Relaxed);
        self.total_bytes.fetch_sub(bytes, Ordering::Relaxed);
        Ok(true)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            entry_count: self.entry_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            tier_deletes: self.tier_deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
