//! # Path Sandbox
//!
//! A small filesystem library that restricts all file operations to a single
//! base directory and provides an atomic `promote` operation for publishing
//! files into the sandbox from elsewhere on disk.
//!
//! All relative paths are validated before use: absolute paths, `..`
//! traversal components and symlinks that resolve outside the base directory
//! are refused with [`SandboxError::PathValidation`]. Promotion first attempts
//! a plain `rename` (atomic when source and destination share a filesystem)
//! and falls back to a buffered copy into a `.tmp` sibling followed by a
//! rename, so a partially written file is never visible at the final path.
//!
//! ## Basic usage
//!
//! ```no_run
//! use path_sandbox::PathSandbox;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), path_sandbox::SandboxError> {
//! let sandbox = PathSandbox::builder()
//!     .base_directory("/var/lib/tvmux/output")
//!     .create_base(true)
//!     .build()
//!     .await?;
//!
//! sandbox.write("proxies/demo.m3u", "#EXTM3U\n").await?;
//! let content = sandbox.read_to_string("proxies/demo.m3u").await?;
//!
//! // Atomically move a file produced outside the sandbox into it.
//! sandbox
//!     .promote("/tmp/pipeline/demo.m3u".as_ref(), "proxies/demo.m3u", &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod promote;
mod security;

pub use error::{Result, SandboxError};

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A filesystem root that all operations are confined to.
///
/// Cloning is cheap; clones share the same base directory.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    base: PathBuf,
}

impl PathSandbox {
    /// Start building a sandbox.
    pub fn builder() -> PathSandboxBuilder {
        PathSandboxBuilder::default()
    }

    /// The canonicalized base directory of this sandbox.
    pub fn base_directory(&self) -> &Path {
        &self.base
    }

    /// Resolve a relative path to its absolute location inside the sandbox,
    /// refusing escape attempts.
    pub fn resolve<P: AsRef<str>>(&self, path: P) -> Result<PathBuf> {
        security::resolve_within(&self.base, path.as_ref())
    }

    /// Write a file, creating parent directories as needed.
    pub async fn write<P: AsRef<str>, C: AsRef<[u8]>>(&self, path: P, contents: C) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, contents.as_ref()).await?;
        Ok(())
    }

    /// Read a file's raw bytes.
    pub async fn read<P: AsRef<str>>(&self, path: P) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(fs::read(&full).await?)
    }

    /// Read a file as UTF-8 text.
    pub async fn read_to_string<P: AsRef<str>>(&self, path: P) -> Result<String> {
        let full = self.resolve(path)?;
        Ok(fs::read_to_string(&full).await?)
    }

    /// Create a directory and all of its parents.
    pub async fn create_dir_all<P: AsRef<str>>(&self, path: P) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|source| SandboxError::DirectoryCreation { path: full, source })
    }

    /// Remove a single file.
    pub async fn remove_file<P: AsRef<str>>(&self, path: P) -> Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).await?;
        Ok(())
    }

    /// Remove a directory tree rooted inside the sandbox.
    pub async fn remove_dir_all<P: AsRef<str>>(&self, path: P) -> Result<()> {
        let full = self.resolve(path)?;
        fs::remove_dir_all(&full).await?;
        Ok(())
    }

    /// Whether a path currently exists inside the sandbox.
    pub async fn exists<P: AsRef<str>>(&self, path: P) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await?)
    }

    /// Metadata for a sandboxed path.
    pub async fn metadata<P: AsRef<str>>(&self, path: P) -> Result<std::fs::Metadata> {
        let full = self.resolve(path)?;
        Ok(fs::metadata(&full).await?)
    }

    /// Atomically place `source` (an absolute path, typically outside the
    /// sandbox) at `dest` inside the sandbox.
    ///
    /// A plain rename is attempted first. When the source lives on a
    /// different filesystem the content is copied to `<dest>.tmp` in bounded
    /// chunks (honouring `token` between chunks) and then renamed over the
    /// destination, so readers never observe a partially written file at the
    /// final path. The `.tmp` file is removed if anything fails.
    pub async fn promote(
        &self,
        source: &Path,
        dest: &str,
        token: &CancellationToken,
    ) -> Result<u64> {
        let full_dest = self.resolve(dest)?;
        if let Some(parent) = full_dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        promote::promote_file(source, &full_dest, token).await
    }
}

/// Builder for [`PathSandbox`].
#[derive(Debug, Default)]
pub struct PathSandboxBuilder {
    base: Option<PathBuf>,
    create_base: bool,
}

impl PathSandboxBuilder {
    /// Set the base directory that all operations are confined to.
    pub fn base_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base = Some(path.into());
        self
    }

    /// Create the base directory (mode 0755 on Unix) if it does not exist.
    pub fn create_base(mut self, create: bool) -> Self {
        self.create_base = create;
        self
    }

    /// Build the sandbox, canonicalizing the base directory.
    pub async fn build(self) -> Result<PathSandbox> {
        let base = self.base.ok_or_else(|| SandboxError::Configuration {
            message: "base_directory is required".to_string(),
        })?;

        if self.create_base {
            fs::create_dir_all(&base)
                .await
                .map_err(|source| SandboxError::DirectoryCreation {
                    path: base.clone(),
                    source,
                })?;
        }

        let canonical = fs::canonicalize(&base)
            .await
            .map_err(|e| SandboxError::PathValidation {
                path: base.clone(),
                reason: format!("base directory cannot be canonicalized: {e}"),
            })?;

        debug!("path sandbox rooted at {}", canonical.display());
        Ok(PathSandbox { base: canonical })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sandbox() -> (tempfile::TempDir, PathSandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::builder()
            .base_directory(dir.path())
            .build()
            .await
            .unwrap();
        (dir, sandbox)
    }

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let (_dir, sandbox) = sandbox().await;
        sandbox.write("a/b/file.txt", "hello").await.unwrap();
        assert_eq!(sandbox.read_to_string("a/b/file.txt").await.unwrap(), "hello");
        assert!(sandbox.exists("a/b/file.txt").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let (_dir, sandbox) = sandbox().await;
        assert!(matches!(
            sandbox.write("../escape.txt", "nope").await,
            Err(SandboxError::PathValidation { .. })
        ));
        assert!(matches!(
            sandbox.write("a/../../escape.txt", "nope").await,
            Err(SandboxError::PathValidation { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_absolute_paths() {
        let (_dir, sandbox) = sandbox().await;
        assert!(matches!(
            sandbox.read("/etc/hosts").await,
            Err(SandboxError::PathValidation { .. })
        ));
    }

    #[tokio::test]
    async fn promote_moves_file_into_sandbox() {
        let (_dir, sandbox) = sandbox().await;
        let staging = tempfile::tempdir().unwrap();
        let src = staging.path().join("payload.m3u");
        tokio::fs::write(&src, "#EXTM3U\n").await.unwrap();

        let bytes = sandbox
            .promote(&src, "out/payload.m3u", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bytes, 8);
        assert_eq!(
            sandbox.read_to_string("out/payload.m3u").await.unwrap(),
            "#EXTM3U\n"
        );
        assert!(!tokio::fs::try_exists(&src).await.unwrap());
    }
}
