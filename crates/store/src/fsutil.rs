//! Blocking file helpers run on the blocking pool.

use std::io::Write;
use std::path::{Path, PathBuf};

use cm_domain::error::{Error, Result};

/// Replace `path` with `bytes` atomically: write a sibling temp file, fsync,
/// then rename over the target. Readers see the old or the new document,
/// never a torn one.
pub async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_atomic_sync(&path, &bytes))
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

pub fn write_atomic_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Append pre-serialized JSON lines.
pub async fn append_lines(path: PathBuf, buf: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

/// Read a file, mapping "not found" to `None`.
pub async fn read_optional(path: PathBuf) -> Result<Option<String>> {
    tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_atomic(path.clone(), b"first".to_vec()).await.unwrap();
        write_atomic(path.clone(), b"second".to_vec()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn read_optional_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let got = read_optional(dir.path().join("absent.json")).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_lines(path.clone(), "{\"a\":1}\n".into()).await.unwrap();
        append_lines(path.clone(), "{\"a\":2}\n".into()).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }
}
