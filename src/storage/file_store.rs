use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::fs::File;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    fs::operations::{commit_write, directory_size, discard_staged, file_size, stage_write},
};

use super::kv::KeyValueStore;

const EXTENSION: &str = "json";
const LOCK_FILE: &str = ".lock";

/// The main realization of [KeyValueStore]. Every key is a JSON file in one directory. Writes
/// replace files atomically, and an advisory lock file keeps the host and the CLI from
/// interleaving writes.
pub struct FileStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        Self::with_quota(dir, None)
    }

    pub fn with_quota(dir: PathBuf, quota: Option<u64>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_key(key)))
    }

    async fn open_lock(&self) -> Result<File, std::io::Error> {
        File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .await
    }

    async fn check_quota(&self, writes: &[(PathBuf, Vec<u8>)]) -> Result<(), StoreError> {
        let Some(quota) = self.quota else {
            return Ok(());
        };
        let mut required = directory_size(&self.dir, EXTENSION).await?;
        for (path, bytes) in writes {
            required = required.saturating_sub(file_size(path).await?) + bytes.len() as u64;
        }
        if required > quota {
            return Err(StoreError::QuotaExceeded { required, quota });
        }
        Ok(())
    }
}

/// `stats:2024-03-15` becomes `stats__2024-03-15`, since `:` isn't allowed in Windows file
/// names. Keys never contain `__` themselves.
fn encode_key(key: &str) -> String {
    key.replace(':', "__")
}

fn decode_key(name: &str) -> String {
    name.replace("__", ":")
}

async fn read_value(path: &Path) -> Result<Option<Value>, StoreError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&contents) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            // Treated as absent. Can only happen if the file was edited by hand.
            warn!("Ignoring corrupted value in {path:?}: {e}");
            Ok(None)
        }
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>, StoreError> {
        let lock = self.open_lock().await?;
        lock.lock_shared()?;

        let reads = stream::iter(keys.iter().cloned())
            .map(|key| {
                let path = self.path_for(&key);
                async move { (key, read_value(&path).await) }
            })
            .buffered(4)
            .collect::<Vec<_>>()
            .await;

        lock.unlock_async().await?;

        let mut values = HashMap::with_capacity(reads.len());
        for (key, value) in reads {
            if let Some(value) = value? {
                values.insert(key, value);
            }
        }
        Ok(values)
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut writes = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            writes.push((self.path_for(key), serde_json::to_vec(value)?));
        }

        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result = async {
            self.check_quota(&writes).await?;
            // Every entry is staged before any target is replaced, so a failed write leaves all
            // previous values in place.
            let mut staged = Vec::with_capacity(writes.len());
            for (path, bytes) in &writes {
                match stage_write(path, bytes).await {
                    Ok(temp) => staged.push((temp, path)),
                    Err(e) => {
                        for (temp, _) in &staged {
                            discard_staged(temp).await;
                        }
                        return Err(StoreError::from(e));
                    }
                }
            }
            for (temp, path) in &staged {
                debug!("Writing {path:?}");
                commit_write(temp, path).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;
        lock.unlock_async().await?;
        result
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result = async {
            let mut removed = 0;
            for key in keys {
                match tokio::fs::remove_file(self.path_for(key)).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::from(e)),
                }
            }
            Ok::<usize, StoreError>(removed)
        }
        .await;
        lock.unlock_async().await?;
        result
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|v| v.to_str()) {
                    keys.push(decode_key(stem));
                }
            }
        }
        Ok(keys)
    }
}
