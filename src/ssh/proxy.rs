//! Proxy commands
//!
//! A proxy command is a local process (typically `ssh -W %h:%p jumphost`)
//! whose stdin/stdout carry the SSH transport to the target host, in the
//! manner of OpenSSH's `ProxyCommand`.

use std::process::Stdio;

use tokio::io::Join;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{RemoteError, Result};

/// Byte stream over a proxy process' stdout (read side) and stdin (write side)
pub type ProxyStream = Join<ChildStdout, ChildStdin>;

/// A spawned proxy command
#[derive(Debug)]
pub struct ProxyProcess {
    command: String,
    child: Child,
}

impl ProxyProcess {
    /// Spawn `command` through `sh -c` after expanding `%h`, `%p`, `%r` and `%%`.
    ///
    /// The child is killed when the returned process is dropped.
    pub fn spawn(command: &str, host: &str, port: u16, user: &str) -> Result<(Self, ProxyStream)> {
        let expanded = expand_tokens(command, host, port, user);
        debug!(proxy = %expanded, "Spawning proxy command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&expanded)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RemoteError::connection(format!("Failed to spawn proxy command '{}': {}", expanded, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RemoteError::connection("Proxy command has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::connection("Proxy command has no stdout"))?;

        Ok((
            Self {
                command: expanded,
                child,
            },
            tokio::io::join(stdout, stdin),
        ))
    }

    /// The command line as run, tokens expanded
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Kill the process and reap it
    pub async fn terminate(mut self) -> std::io::Result<()> {
        if let Some(status) = self.child.try_wait()? {
            debug!(proxy = %self.command, %status, "Proxy command already exited");
            return Ok(());
        }
        if let Err(e) = self.child.kill().await {
            warn!(proxy = %self.command, error = %e, "Failed to kill proxy command");
            return Err(e);
        }
        Ok(())
    }
}

/// Expand OpenSSH-style `%h`, `%p`, `%r` and `%%` tokens
pub fn expand_tokens(command: &str, host: &str, port: u16, user: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(host),
            Some('p') => out.push_str(&port.to_string()),
            Some('r') => out.push_str(user),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_expand_tokens() {
        assert_eq!(
            expand_tokens("ssh -W %h:%p -l %r jump", "10.0.0.5", 22, "stack"),
            "ssh -W 10.0.0.5:22 -l stack jump"
        );
    }

    #[test]
    fn test_expand_tokens_literal_percent() {
        assert_eq!(expand_tokens("echo 100%%", "h", 22, "u"), "echo 100%");
        assert_eq!(expand_tokens("a %x b %", "h", 22, "u"), "a %x b %");
    }

    #[test]
    fn test_expand_tokens_without_tokens() {
        assert_eq!(expand_tokens("nc gw 22", "h", 2222, "u"), "nc gw 22");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_proxy_stream_pipes_through_process() {
        let (proxy, mut stream) = ProxyProcess::spawn("cat", "h", 22, "u").unwrap();
        assert_eq!(proxy.command(), "cat");

        stream.write_all(b"SSH-2.0-hello\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 15];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SSH-2.0-hello\r\n");

        drop(stream);
        proxy.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_exited_process() {
        let (proxy, stream) = ProxyProcess::spawn("true", "h", 22, "u").unwrap();
        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(proxy.terminate().await.is_ok());
    }
}
