//! remote-exec - SSH remote command execution for acceptance tests
//!
//! This crate gives test code a reusable way to reach cluster nodes over SSH.
//! A session connects with retries (keys first, then password, rotating
//! through proxy commands), runs commands with stdout and stderr captured
//! separately, escalates with `sudo` inside a scope, and moves files over SFTP.
//!
//! # Features
//!
//! - `execute` / `check_call` / `check_stderr` with typed failures
//! - `execute_together` to start one command on many hosts at once
//! - Scoped sudo via [`SshSession::get_sudo`]
//! - Recursive upload, single-file download, `mkdir`, `rm_rf`, existence checks
//! - Proxy commands (`ssh -W %h:%p jumphost`) as the transport socket
//!
//! # Example
//!
//! ```no_run
//! use remote_exec::{SshConfig, SshSession};
//!
//! # async fn run() -> remote_exec::Result<()> {
//! let config = SshConfig::new("controller-0", "heat-admin").with_password("secret");
//! let mut session = SshSession::open(config).await?;
//!
//! let result = session.check_call("uptime").await?;
//! println!("{}", result.stdout_string());
//!
//! {
//!     let sudo = session.get_sudo();
//!     sudo.check_call("systemctl restart openstack-nova-api").await?;
//! }
//!
//! session.exit().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{CalledProcessError, ExitCodes, RemoteError, Result};
pub use ssh::{CommandResult, RemoteProcess, RetryPolicy, SshConfig, SshSession, SudoGuard};
