use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::contract::Cache;
use crate::error::CacheError;

/// Directory-backed cache.
///
/// Layout under `root`:
/// - `keys/<encoded key>`: the value, replaced atomically via rename.
/// - `sets/<encoded set>/<encoded member>`: one marker file per member,
///   holding the member name.
/// - `tmp/`: staging area for in-flight writes.
///
/// Names whose encoding would not fit in a single path component are stored
/// under `~<sha256 hex>` instead. `~` is always escaped by the encoder, so the
/// two forms never collide.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

/// Longest file name written, under the usual 255 byte limit.
const MAX_FILE_NAME: usize = 240;
const HASHED_PREFIX: char = '~';

fn file_name(raw: &str) -> String {
    let encoded = utf8_percent_encode(raw, NON_ALPHANUMERIC).to_string();
    if encoded.len() <= MAX_FILE_NAME {
        return encoded;
    }
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{HASHED_PREFIX}{:x}", hasher.finalize())
}

fn not_found_ok(result: std::io::Result<()>, action: impl FnOnce() -> String) -> Result<(), CacheError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(action(), e)),
    }
}

impl FsCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["keys", "sets", "tmp"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| CacheError::io(format!("creating {}", path.display()), e))?;
        }
        debug!(root = %root.display(), "Opened filesystem cache");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join("keys").join(file_name(key))
    }

    fn set_dir(&self, set: &str) -> PathBuf {
        self.root.join("sets").join(file_name(set))
    }
}

#[async_trait]
impl Cache for FsCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.key_path(key);
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let staging = self.root.join("tmp").join(uuid::Uuid::new_v4().to_string());
        let target = self.key_path(key);

        fs::write(&staging, value)
            .await
            .map_err(|e| CacheError::io(format!("writing {}", staging.display()), e))?;
        if let Err(e) = fs::rename(&staging, &target).await {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                warn!(error = ?cleanup, path = %staging.display(), "Failed to remove staging file");
            }
            return Err(CacheError::io(format!("replacing {}", target.display()), e));
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let path = self.key_path(key);
        not_found_ok(fs::remove_file(&path).await, || {
            format!("removing {}", path.display())
        })
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), CacheError> {
        let dir = self.set_dir(set);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(format!("creating {}", dir.display()), e))?;
        let marker = dir.join(file_name(member));
        fs::write(&marker, member)
            .await
            .map_err(|e| CacheError::io(format!("writing {}", marker.display()), e))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), CacheError> {
        let marker = self.set_dir(set).join(file_name(member));
        not_found_ok(fs::remove_file(&marker).await, || {
            format!("removing {}", marker.display())
        })
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, CacheError> {
        let dir = self.set_dir(set);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(format!("listing {}", dir.display()), e)),
        };

        let mut members = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(format!("listing {}", dir.display()), e))?
        {
            let name = entry.file_name();
            let encoded = name.to_string_lossy();
            if encoded.starts_with(HASHED_PREFIX) {
                let path = entry.path();
                let member = fs::read_to_string(&path)
                    .await
                    .map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
                members.push(member);
                continue;
            }
            let member = percent_decode_str(&encoded)
                .decode_utf8()
                .map_err(|e| CacheError::Corrupt {
                    key: format!("{set}/{encoded}"),
                    message: e.to_string(),
                })?;
            members.push(member.into_owned());
        }
        members.sort();
        Ok(members)
    }
}
