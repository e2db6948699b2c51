//! Disk-backed storage medium.
//!
//! Each key maps to one file under a root directory. Key bytes outside
//! `[A-Za-z0-9_-]` are percent-escaped so any key is a valid single path
//! component, which keeps the medium flat. Writes land in a `.tmp` sibling
//! first and are renamed into place, so a crash never leaves a torn value.
//!
//! Keys whose escaped name would not fit in a file name are stored under
//! `h.<sha256 of key>` instead. Those files start with a length-prefixed copy
//! of the key, so [`Storage::keys`] can still list them. The `.` can never
//! appear in an escaped name, so the two layouts don't collide.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::traits::{BoxFuture, Storage, StorageError};

const TEMP_SUFFIX: &str = ".tmp";

/// Prefix of file names derived from a key hash.
const HASHED_PREFIX: &str = "h.";

/// Longest escaped name stored as-is. Leaves room for the temp suffix under
/// the common 255-byte `NAME_MAX`.
const MAX_ESCAPED_NAME_LEN: usize = 200;

/// Where a key lives on disk.
#[derive(Debug)]
struct Slot {
    path: PathBuf,
    /// File carries a key header before the value.
    hashed: bool,
}

/// Disk-backed key-value medium.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    used: AtomicU64,
    quota: Option<u64>,

    /// Serializes mutations so quota accounting matches the directory.
    write_lock: Mutex<()>,
}

impl DiskStorage {
    /// Open (creating if needed) a medium rooted at `root`.
    ///
    /// Existing values are counted towards the size so quotas hold across
    /// restarts. Leftover temp files from interrupted writes are removed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut used = 0u64;
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                tokio::fs::remove_file(entry.path()).await.ok();
                continue;
            }
            used += entry.metadata().await?.len();
        }

        tracing::debug!(root = %root.display(), used, "Opened disk storage");

        Ok(Self {
            root,
            used: AtomicU64::new(used),
            quota: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Limit the medium to `quota` bytes of stored values.
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Root directory of the medium.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_for(&self, key: &str) -> Slot {
        let escaped = escape_key(key);
        if escaped.len() <= MAX_ESCAPED_NAME_LEN {
            Slot {
                path: self.root.join(escaped),
                hashed: false,
            }
        } else {
            Slot {
                path: self.root.join(hashed_name(key)),
                hashed: true,
            }
        }
    }

    async fn file_len(path: &Path) -> io::Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_value(&self, key: String, value: Vec<u8>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let Slot { path, hashed } = self.slot_for(&key);
        let value = if hashed {
            encode_with_key(&key, &value)
        } else {
            value
        };
        let previous = Self::file_len(&path).await?.unwrap_or(0);
        let incoming = value.len() as u64;
        let used = self.used.load(Ordering::SeqCst);

        if let Some(quota) = self.quota {
            if used - previous + incoming > quota {
                return Err(StorageError::QuotaExceeded {
                    key,
                    needed: incoming,
                    available: quota.saturating_sub(used - previous),
                });
            }
        }

        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, &value).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }

        self.used
            .store(used - previous + incoming, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_value(&self, key: String) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.slot_for(&key).path;
        let Some(len) = Self::file_len(&path).await? else {
            return Ok(false);
        };
        tokio::fs::remove_file(&path).await?;
        self.used.fetch_sub(len, Ordering::SeqCst);
        Ok(true)
    }

    async fn list_keys(&self, prefix: String) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let key = if name.starts_with(HASHED_PREFIX) {
                let bytes = tokio::fs::read(entry.path()).await?;
                decode_with_key(&bytes).map(|(key, _)| key)
            } else {
                unescape_key(&name)
            };
            if let Some(key) = key {
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl Storage for DiskStorage {
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StorageError>> {
        let key = key.to_string();
        Box::pin(self.write_value(key, value))
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let Slot { path, hashed } = self.slot_for(key);
        let key = key.to_string();
        Box::pin(async move {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if !hashed {
                return Ok(Some(bytes));
            }
            match decode_with_key(&bytes) {
                Some((stored, value)) if stored == key => Ok(Some(value.to_vec())),
                Some(_) => Ok(None),
                None => Err(StorageError::Corrupt {
                    key,
                    reason: "missing key header".to_string(),
                }),
            }
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = key.to_string();
        Box::pin(self.remove_value(key))
    }

    fn contains(&self, key: &str) -> BoxFuture<'_, Result<bool, StorageError>> {
        let path = self.slot_for(key).path;
        Box::pin(async move { Ok(Self::file_len(&path).await?.is_some()) })
    }

    fn keys(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<String>, StorageError>> {
        let prefix = prefix.to_string();
        Box::pin(self.list_keys(prefix))
    }

    fn size_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

/// Escape a key into a single file name.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn hashed_name(key: &str) -> String {
    format!("{}{:x}", HASHED_PREFIX, Sha256::digest(key.as_bytes()))
}

/// Prefix `value` with `key` as `<u32 BE length><key bytes>`.
fn encode_with_key(key: &str, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len() + value.len());
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(value);
    out
}

/// Split a file written by [`encode_with_key`] into key and value.
fn decode_with_key(bytes: &[u8]) -> Option<(String, &[u8])> {
    let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let key = bytes.get(4..4 + len)?;
    let key = String::from_utf8(key.to_vec()).ok()?;
    Some((key, &bytes[4 + len..]))
}

/// Reverse [`escape_key`]. Returns `None` for names this medium didn't write.
fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_roundtrip() {
        for key in ["assets:js/app.js", "index:hashes", "..", "a b/c%d", "ünï"] {
            let escaped = escape_key(key);
            assert!(!escaped.contains('/'));
            assert!(!escaped.contains('.'));
            assert_eq!(unescape_key(&escaped).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_unescape_rejects_truncated_escape() {
        assert_eq!(unescape_key("abc%2"), None);
    }

    #[test]
    fn test_key_header_roundtrip() {
        let encoded = encode_with_key("assets:long", b"body");
        let (key, value) = decode_with_key(&encoded).unwrap();
        assert_eq!(key, "assets:long");
        assert_eq!(value, b"body");
        assert_eq!(decode_with_key(&[0, 0, 0, 9, b'a']), None);
    }

    #[tokio::test]
    async fn test_long_key_uses_hashed_file_name() {
        let temp = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp.path()).await.unwrap();
        let key = format!("assets:chunks/{}.js", "a".repeat(300));

        storage.set(&key, b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.get(&key).await.unwrap(), Some(b"hello".to_vec()));
        assert!(storage.contains(&key).await.unwrap());
        assert_eq!(storage.keys("assets:").await.unwrap(), vec![key.clone()]);

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with(HASHED_PREFIX));
        assert!(names[0].len() <= MAX_ESCAPED_NAME_LEN);

        let reopened = DiskStorage::open(temp.path()).await.unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(reopened.size_bytes(), storage.size_bytes());

        assert!(reopened.delete(&key).await.unwrap());
        assert_eq!(reopened.get(&key).await.unwrap(), None);
        assert_eq!(reopened.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_missing_long_key_is_absent() {
        let temp = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp.path()).await.unwrap();
        let key = format!("assets:{}", "%".repeat(300));

        assert_eq!(storage.get(&key).await.unwrap(), None);
        assert!(!storage.contains(&key).await.unwrap());
        assert!(!storage.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let temp = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp.path()).await.unwrap();

        storage.set("assets:app.js", b"hello".to_vec()).await.unwrap();
        assert_eq!(
            storage.get("assets:app.js").await.unwrap(),
            Some(b"hello".to_vec())
        );
        assert!(storage.contains("assets:app.js").await.unwrap());
        assert_eq!(storage.size_bytes(), 5);

        assert!(storage.delete("assets:app.js").await.unwrap());
        assert_eq!(storage.get("assets:app.js").await.unwrap(), None);
        assert_eq!(storage.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let storage = DiskStorage::open(temp.path()).await.unwrap();
            storage.set("index:hashes", b"{}".to_vec()).await.unwrap();
        }

        let storage = DiskStorage::open(temp.path()).await.unwrap();
        assert_eq!(
            storage.get("index:hashes").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(storage.size_bytes(), 2);
    }

    #[tokio::test]
    async fn test_open_removes_leftover_temp_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("abc.tmp"), b"partial").unwrap();

        let storage = DiskStorage::open(temp.path()).await.unwrap();
        assert_eq!(storage.size_bytes(), 0);
        assert!(!temp.path().join("abc.tmp").exists());
    }

    #[tokio::test]
    async fn test_quota_rejects_write() {
        let temp = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp.path()).await.unwrap().with_quota(8);

        storage.set("a", vec![0; 6]).await.unwrap();
        let err = storage.set("b", vec![0; 6]).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert!(!storage.contains("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let temp = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp.path()).await.unwrap();

        storage.set("assets:b.css", vec![1]).await.unwrap();
        storage.set("assets:a.js", vec![1]).await.unwrap();
        storage.set("index:hashes", vec![1]).await.unwrap();

        assert_eq!(
            storage.keys("assets:").await.unwrap(),
            vec!["assets:a.js", "assets:b.css"]
        );
    }
}
