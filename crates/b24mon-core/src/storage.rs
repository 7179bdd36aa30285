//! JSON file persistence shared by the subscriber, incident and metrics stores.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::{errors::Error, Result};

/// Read and decode a JSON file. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::storage(path, format!("corrupt json: {e}")))
}

/// Write `value` as pretty JSON via a temp file + rename, so readers never see
/// a half-written file.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path).await?;
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| Error::storage(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::storage(path, e));
    }
    Ok(())
}

pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::storage(dir, e)),
        _ => Ok(()),
    }
}

/// Verify that `path` can be read (if it exists) and that its directory
/// accepts new files.
pub async fn probe(path: &Path) -> Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::storage(path, e))?;
    }

    ensure_parent_dir(path).await?;
    let probe = path.with_file_name(format!(".probe-{}", std::process::id()));
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| Error::storage(&probe, format!("directory not writable: {e}")))?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "data".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let got: Option<Vec<i64>> = read_json(&dir.path().join("nope.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn write_then_read_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/data.json");
        write_json_atomic(&path, &vec![1i64, 2, 3]).await.unwrap();
        let got: Option<Vec<i64>> = read_json(&path).await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_json::<Vec<i64>>(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }), "{err}");
    }

    #[tokio::test]
    async fn write_check_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let err = probe(&blocker.join("subscribers.json")).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }), "{err}");

        assert!(probe(&dir.path().join("ok/subscribers.json")).await.is_ok());
    }
}
