//! Filesystem helpers for download outputs and compressed replacements.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// Replace `dst` with `src`, falling back to copy-and-delete across devices.
pub async fn replace_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let staging = dst.with_extension("tmp");
            fs::copy(src, &staging).await?;
            if let Err(e) = fs::rename(&staging, dst).await {
                let _ = fs::remove_file(&staging).await;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(src).await {
                warn!("Failed to remove {} after copy: {}", src.display(), e);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

/// Delete a file, ignoring "not found". Returns whether something was removed.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Files in `dir` named `<stem>.<anything>`, largest first.
pub async fn files_with_stem(dir: &Path, stem: &str) -> MediaResult<Vec<(PathBuf, u64)>> {
    let prefix = format!("{stem}.");
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() {
            found.push((entry.path(), meta.len()));
        }
    }
    found.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(found)
}

pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    Ok(fs::metadata(path).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replace_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("clip_compressed.mp4");
        let dst = dir.path().join("clip.mp4");

        fs::write(&src, b"small").await.unwrap();
        fs::write(&dst, b"much larger original").await.unwrap();

        replace_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "small");
    }

    #[tokio::test]
    async fn test_files_with_stem_sorted_by_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("01_abc.webm"), vec![0u8; 10]).await.unwrap();
        fs::write(dir.path().join("01_abc.m4a"), vec![0u8; 30]).await.unwrap();
        fs::write(dir.path().join("02_other.mp4"), vec![0u8; 99]).await.unwrap();

        let found = files_with_stem(dir.path(), "01_abc").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].0.ends_with("01_abc.m4a"));
    }

    #[tokio::test]
    async fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.part");
        assert!(!remove_if_exists(&path).await);
        fs::write(&path, b"1").await.unwrap();
        assert!(remove_if_exists(&path).await);
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
