//! SSH remote execution
//!
//! Session lifecycle with resilient reconnection, command execution with
//! separated output capture, scoped sudo, and SFTP file transfer.

pub mod command;
pub mod config;
pub mod elevation;
pub mod file_transfer;
pub mod handler;
pub mod proxy;
pub mod result;
pub mod retry;
pub mod session;

// Re-exports
pub use command::RemoteProcess;
pub use config::SshConfig;
pub use elevation::{escape_double_quotes, sanitize_password, wrap_sudo_command};
pub use handler::SshHandler;
pub use proxy::{ProxyProcess, ProxyStream};
pub use result::CommandResult;
pub use retry::RetryPolicy;
pub use session::{credential_candidates, Credential, SshSession, SudoGuard};
