//! Filesystem helpers for installing artifacts and staging inputs.
//!
//! Renderer output may live on a different filesystem from the output
//! directory, so moves fall back to copy-and-delete on EXDEV.

use std::path::Path;
use tokio::fs;

use crate::error::RendererResult;

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a plain rename first. On EXDEV it copies to a temporary file next to
/// `dst`, renames that into place and removes the source.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> RendererResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_file(src, dst).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!(
                    "Failed to remove source file after cross-device move: {}: {}",
                    src.display(),
                    e
                );
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy `src` to `dst` through a temporary file, so readers never observe a
/// partially written destination.
pub async fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> RendererResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    let tmp_dst = dst.with_extension("tmp");
    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy file: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        e
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to rename temp file: {} -> {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        return Err(e.into());
    }

    Ok(())
}

/// Remove a directory tree, ignoring a missing directory.
pub async fn remove_dir_if_exists(dir: impl AsRef<Path>) -> RendererResult<()> {
    match fs::remove_dir_all(dir.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_parent(path: &Path) -> RendererResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// EXDEV is error code 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("demo.mp4");
        let dst = dir.path().join("job").join("result.mp4");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists(), "Source file should be removed");
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_copy_file_keeps_source_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a_syneth.jpg");
        let dst = dir.path().join("result.jpg");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();
        copy_file(&src, &dst).await.unwrap();

        assert!(src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
        assert!(!dir.path().join("result.tmp").exists());
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = copy_file(dir.path().join("nope.jpg"), dir.path().join("out.jpg")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_dir_if_exists() {
        let dir = TempDir::new().unwrap();
        let seq = dir.path().join("seq_1");
        fs::create_dir_all(&seq).await.unwrap();
        fs::write(seq.join("frame.jpg"), b"x").await.unwrap();

        remove_dir_if_exists(&seq).await.unwrap();
        assert!(!seq.exists());
        remove_dir_if_exists(&seq).await.unwrap();
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
