//! SFTP file transfer operations.
//!
//! This module provides:
//! - Idempotent remote directory creation
//! - Single file and recursive directory upload
//! - Single file download
//! - Existence and type checks
//!
//! All of them share one SFTP channel per session, opened on first use and
//! released by [`SshSession::clear`]. Some sshd_config files do not enable
//! sftp by default; the remote host needs a `Subsystem sftp ...` line.

use std::path::{Path, PathBuf};

use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::session::SshSession;
use crate::error::{RemoteError, Result};

impl SshSession {
    /// The session's SFTP channel, opened on first use
    pub async fn sftp(&self) -> Result<&SftpSession> {
        self.sftp
            .get_or_try_init(|| async {
                let channel = self.open_channel().await?;
                channel
                    .request_subsystem(true, "sftp")
                    .await
                    .map_err(|e| {
                        RemoteError::sftp(format!("Failed to request SFTP subsystem: {}", e))
                    })?;
                let sftp = SftpSession::new(channel.into_stream()).await.map_err(|e| {
                    RemoteError::sftp(format!("Failed to initialize SFTP session: {}", e))
                })?;
                debug!(host = %self.host(), "SFTP channel opened");
                Ok(sftp)
            })
            .await
    }

    /// Create a remote directory and its parents; no-op if the path exists.
    ///
    /// Only "no such file" from the stat means "create it"; any other
    /// stat error is returned.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        match sftp.metadata(path).await {
            Ok(_) => {
                debug!(path, "Remote directory already exists");
                return Ok(());
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(RemoteError::sftp(format!("Cannot stat {}: {}", path, e)));
            }
        }

        self.check_call(&format!("mkdir -p {}", quote_path(path)))
            .await?;
        Ok(())
    }

    /// Remove a remote path recursively
    pub async fn rm_rf(&self, path: &str) -> Result<()> {
        self.check_call(&format!("rm -rf {}", quote_path(path)))
            .await?;
        Ok(())
    }

    /// Copy a local file or directory tree to the remote host.
    ///
    /// If `target` is an existing remote directory, the source's base name
    /// is appended to it. Directories are merged into existing ones; files
    /// already present are removed before being copied.
    pub async fn upload(&self, source: impl AsRef<Path>, target: &str) -> Result<()> {
        let source = source.as_ref();

        let target = if self.isdir(target).await {
            remote_join(target, &local_base_name(source).await?)
        } else {
            target.to_string()
        };

        if tokio::fs::metadata(source).await?.is_dir() {
            self.upload_tree(source, &target).await
        } else {
            self.put_file(source, &target).await
        }
    }

    /// Copy a single remote file to the local host.
    ///
    /// If `target` is a local directory, the remote base name is appended.
    /// Remote directories and missing paths are refused without touching
    /// the local side. Returns whether the local target exists afterwards.
    pub async fn download(&self, source: &str, target: impl AsRef<Path>) -> Result<bool> {
        let mut target = target.as_ref().to_path_buf();
        if tokio::fs::metadata(&target)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            target.push(remote_base_name(source));
        }

        match self.stat(source).await {
            Some(metadata) if metadata.is_dir() => {
                warn!(source, "Refusing to download a directory");
            }
            None => {
                warn!(source, "Remote file does not exist, nothing to download");
            }
            Some(_) => self.get_file(source, &target).await?,
        }

        Ok(tokio::fs::try_exists(&target).await.unwrap_or(false))
    }

    /// Whether the remote path exists. Stat errors count as "no".
    pub async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_some()
    }

    /// Whether the remote path is a regular file. Stat errors count as "no".
    pub async fn isfile(&self, path: &str) -> bool {
        self.stat(path).await.is_some_and(|m| m.is_regular())
    }

    /// Whether the remote path is a directory. Stat errors count as "no".
    pub async fn isdir(&self, path: &str) -> bool {
        self.stat(path).await.is_some_and(|m| m.is_dir())
    }

    async fn stat(&self, path: &str) -> Option<FileAttributes> {
        let sftp = self.sftp().await.ok()?;
        sftp.metadata(path).await.ok()
    }

    async fn upload_tree(&self, source: &Path, target: &str) -> Result<()> {
        let sftp = self.sftp().await?;

        // Stack of (local_dir, remote_dir)
        let mut stack: Vec<(PathBuf, String)> = vec![(source.to_path_buf(), target.to_string())];

        while let Some((local_dir, remote_dir)) = stack.pop() {
            self.mkdir(&remote_dir).await?;

            let mut entries = tokio::fs::read_dir(&local_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let local_path = entry.path();
                let remote_path =
                    remote_join(&remote_dir, &entry.file_name().to_string_lossy());

                if tokio::fs::metadata(&local_path).await?.is_dir() {
                    stack.push((local_path, remote_path));
                    continue;
                }

                if self.exists(&remote_path).await {
                    sftp.remove_file(remote_path.as_str()).await?;
                }
                self.put_file(&local_path, &remote_path).await?;
            }
        }

        Ok(())
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let sftp = self.sftp().await?;

        let mut local_file = tokio::fs::File::open(local_path).await?;
        let mut remote_file = sftp.create(remote_path).await?;
        let bytes = tokio::io::copy(&mut local_file, &mut remote_file).await?;
        remote_file.shutdown().await?;

        debug!(
            local = %local_path.display(),
            remote = remote_path,
            bytes,
            "Uploaded file"
        );
        Ok(())
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let sftp = self.sftp().await?;

        let mut remote_file = sftp.open(remote_path).await?;
        let mut local_file = tokio::fs::File::create(local_path).await?;
        let bytes = tokio::io::copy(&mut remote_file, &mut local_file).await?;
        local_file.flush().await?;

        debug!(
            remote = remote_path,
            local = %local_path.display(),
            bytes,
            "Downloaded file"
        );
        Ok(())
    }
}

fn is_not_found(e: &SftpError) -> bool {
    matches!(e, SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile))
}

/// Base name of a local path; `.` and `..` style paths are resolved first
async fn local_base_name(path: &Path) -> Result<String> {
    if let Some(name) = path.file_name() {
        return Ok(name.to_string_lossy().into_owned());
    }

    tokio::fs::canonicalize(path)
        .await?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            RemoteError::invalid_params(format!("Source has no base name: {}", path.display()))
        })
}

/// Join a remote (POSIX) directory and an entry name
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Last component of a remote (POSIX) path
pub fn remote_base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Single-quote a path for the remote shell.
///
/// Embedded single quotes become `'"'"'` (end quote, quoted quote, reopen).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::config::SshConfig;

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("/tmp", "a.txt"), "/tmp/a.txt");
        assert_eq!(remote_join("/tmp/", "a.txt"), "/tmp/a.txt");
        assert_eq!(remote_join("rel", "dir"), "rel/dir");
    }

    #[test]
    fn test_remote_base_name() {
        assert_eq!(remote_base_name("/etc/nova/nova.conf"), "nova.conf");
        assert_eq!(remote_base_name("/var/log/"), "log");
        assert_eq!(remote_base_name("plain"), "plain");
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(quote_path("/tmp/it's"), "'/tmp/it'\"'\"'s'");
    }

    #[tokio::test]
    async fn test_local_base_name_resolves_dot_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("templates");
        std::fs::create_dir(&nested).unwrap();

        assert_eq!(local_base_name(&nested).await.unwrap(), "templates");
        assert_eq!(
            local_base_name(&nested.join("..")).await.unwrap(),
            local_base_name(dir.path()).await.unwrap()
        );
        assert_eq!(
            local_base_name(&nested.join(".")).await.unwrap(),
            "templates"
        );
    }

    #[tokio::test]
    async fn test_local_base_name_of_root_is_invalid() {
        assert!(matches!(
            local_base_name(Path::new("/")).await,
            Err(RemoteError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_dot_source_reaches_transfer() {
        let session = SshSession::new(SshConfig::new("localhost", "testuser"));
        // no base name needed when the target is not a remote directory
        assert!(matches!(
            session.upload(".", "/tmp/new").await,
            Err(RemoteError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_existence_checks_are_false_without_connection() {
        let session = SshSession::new(SshConfig::new("localhost", "testuser"));
        assert!(!session.exists("/etc").await);
        assert!(!session.isfile("/etc/hosts").await);
        assert!(!session.isdir("/etc").await);
    }

    #[tokio::test]
    async fn test_mkdir_requires_connection() {
        let session = SshSession::new(SshConfig::new("localhost", "testuser"));
        assert!(matches!(
            session.mkdir("/tmp/x").await,
            Err(RemoteError::Connection(_))
        ));
    }
}
