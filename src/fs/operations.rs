use std::path::{Path, PathBuf};

use tokio::{
    fs,
    io::{self, AsyncWriteExt},
};

/// Replaces the contents of `path` so that readers observe either the old or the new content,
/// never a partial write. Data goes to a sibling temp file which is then renamed over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temp = stage_write(path, contents).await?;
    commit_write(&temp, path).await
}

/// First half of [write_atomic]: writes and syncs the sibling temp file, returning its path.
/// The target is untouched until [commit_write].
pub async fn stage_write(path: &Path, contents: &[u8]) -> Result<PathBuf, io::Error> {
    let temp = temp_path(path);
    let result = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }
    .await;
    match result {
        Ok(()) => Ok(temp),
        Err(e) => {
            discard_staged(&temp).await;
            Err(e)
        }
    }
}

/// Renames a staged temp file over its target.
pub async fn commit_write(temp: &Path, path: &Path) -> Result<(), io::Error> {
    match fs::rename(temp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            discard_staged(temp).await;
            Err(e)
        }
    }
}

pub async fn discard_staged(temp: &Path) {
    let _ = fs::remove_file(temp).await;
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|v| v.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Size of a file in bytes, 0 when it doesn't exist.
pub async fn file_size(path: &Path) -> Result<u64, io::Error> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

/// Total size of regular files in a directory with the given extension (non-recursive).
pub async fn directory_size(dir: &Path, extension: &str) -> Result<u64, io::Error> {
    let mut entries = fs::read_dir(dir).await?;
    let mut total = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == extension) {
            total += entry.metadata().await?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{directory_size, file_size, write_atomic};

    #[tokio::test]
    async fn test_write_atomic_replaces_content() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("value.json");

        write_atomic(&path, b"first").await?;
        write_atomic(&path, b"second value").await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "second value");
        assert!(!dir.path().join("value.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_sizes() -> Result<()> {
        let dir = tempdir()?;
        write_atomic(&dir.path().join("a.json"), b"1234").await?;
        write_atomic(&dir.path().join("b.json"), b"12").await?;
        write_atomic(&dir.path().join("c.txt"), b"123456").await?;

        assert_eq!(directory_size(dir.path(), "json").await?, 6);
        assert_eq!(file_size(&dir.path().join("a.json")).await?, 4);
        assert_eq!(file_size(&dir.path().join("missing.json")).await?, 0);
        Ok(())
    }
}
