//! Atomic file promotion.
//!
//! `rename` is atomic when source and destination share a filesystem. When
//! they do not (EXDEV), the content is copied to a `.tmp` sibling of the
//! destination and renamed into place, so the final path only ever holds
//! either the previous file or the complete new one.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Place `source` at `dest`, atomically with respect to readers of `dest`.
/// Returns the number of bytes now at `dest`.
pub async fn promote_file(
    source: &Path,
    dest: &Path,
    token: &CancellationToken,
) -> Result<u64> {
    let size = fs::metadata(source).await?.len();

    match fs::rename(source, dest).await {
        Ok(()) => {
            debug!("renamed {} -> {}", source.display(), dest.display());
            return Ok(size);
        }
        Err(e) if is_cross_device(&e) => {
            debug!(
                "rename {} -> {} crossed filesystems, falling back to copy",
                source.display(),
                dest.display()
            );
        }
        Err(e) => {
            return Err(SandboxError::Promotion {
                source_path: source.to_path_buf(),
                dest: dest.to_path_buf(),
                reason: format!("rename failed: {e}"),
            });
        }
    }

    let tmp = tmp_sibling(dest);
    let copied = match copy_chunked(source, &tmp, token).await {
        Ok(copied) => copied,
        Err(e) => {
            remove_quietly(&tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&tmp, dest).await {
        remove_quietly(&tmp).await;
        return Err(SandboxError::Promotion {
            source_path: source.to_path_buf(),
            dest: dest.to_path_buf(),
            reason: format!("final rename failed: {e}"),
        });
    }

    remove_quietly(source).await;
    Ok(copied)
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn is_cross_device(e: &std::io::Error) -> bool {
    // EXDEV has no ErrorKind on stable; match the raw errno.
    e.raw_os_error() == Some(18) || e.kind() == std::io::ErrorKind::CrossesDevices
}

async fn copy_chunked(source: &Path, tmp: &Path, token: &CancellationToken) -> Result<u64> {
    let mut reader = fs::File::open(source).await?;
    let mut writer = fs::File::create(tmp).await?;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(SandboxError::Cancelled {
                dest: tmp.to_path_buf(),
            });
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    writer.flush().await?;
    writer.sync_all().await?;
    Ok(copied)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_chunked_writes_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let tmp = dir.path().join("dst.bin.tmp");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &payload).await.unwrap();

        let copied = copy_chunked(&src, &tmp, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(fs::read(&tmp).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn copy_chunked_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let tmp = dir.path().join("dst.bin.tmp");
        fs::write(&src, vec![0u8; 1024]).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = copy_chunked(&src, &tmp, &token).await;
        assert!(matches!(result, Err(SandboxError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn promote_same_filesystem_uses_rename() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dest = dir.path().join("b.txt");
        fs::write(&src, "content").await.unwrap();

        let size = promote_file(&src, &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 7);
        assert!(!fs::try_exists(&src).await.unwrap());
        assert_eq!(fs::read_to_string(&dest).await.unwrap(), "content");
    }

    #[tokio::test]
    async fn tmp_sibling_appends_suffix() {
        assert_eq!(
            tmp_sibling(Path::new("/out/proxy.m3u")),
            PathBuf::from("/out/proxy.m3u.tmp")
        );
    }
}
