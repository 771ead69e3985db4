//! Error types for the remote execution client

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Main error type for the remote execution client
#[derive(Debug, Error)]
pub enum RemoteError {
    /// SSH connection failed (including exhausted reconnect attempts)
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Remote command exited with a non-zero status (or wrote to stderr)
    #[error(transparent)]
    CalledProcess(#[from] CalledProcessError),

    /// SFTP subsystem error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using RemoteError
pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        RemoteError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        RemoteError::Authentication(msg.into())
    }

    /// Create an SFTP error from a string
    pub fn sftp(msg: impl Into<String>) -> Self {
        RemoteError::Sftp(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        RemoteError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        RemoteError::Config(msg.into())
    }

    /// The command failure carried by this error, if any
    pub fn as_called_process(&self) -> Option<&CalledProcessError> {
        match self {
            RemoteError::CalledProcess(e) => Some(e),
            _ => None,
        }
    }
}

impl From<russh::Error> for RemoteError {
    fn from(e: russh::Error) -> Self {
        RemoteError::Connection(e.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for RemoteError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        RemoteError::Sftp(e.to_string())
    }
}

/// Exit status carried by a [`CalledProcessError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCodes {
    /// Exit code of a command run on a single session
    Single(i32),

    /// Exit codes of the failing hosts of a parallel run, keyed by hostname
    PerHost(BTreeMap<String, i32>),
}

impl fmt::Display for ExitCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCodes::Single(code) => write!(f, "{}", code),
            ExitCodes::PerHost(codes) => {
                let parts: Vec<String> = codes
                    .iter()
                    .map(|(host, code)| format!("{}={}", host, code))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// A remote command that did not succeed
///
/// A single-session failure with exit code 0 comes from the strict check,
/// which also rejects output on stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalledProcessError {
    /// The command text as given by the caller
    pub command: String,

    /// Exit code, or per-host exit codes for parallel execution
    pub exit_codes: ExitCodes,

    /// Captured stdout followed by captured stderr
    pub output: String,
}

impl CalledProcessError {
    pub fn new(command: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            exit_codes: ExitCodes::Single(exit_code),
            output: output.into(),
        }
    }

    pub fn per_host(
        command: impl Into<String>,
        exit_codes: BTreeMap<String, i32>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            exit_codes: ExitCodes::PerHost(exit_codes),
            output: output.into(),
        }
    }

    /// Exit code of a single-session failure
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit_codes {
            ExitCodes::Single(code) => Some(code),
            ExitCodes::PerHost(_) => None,
        }
    }
}

impl fmt::Display for CalledProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_codes {
            ExitCodes::Single(0) => write!(
                f,
                "Command '{}' wrote to stderr (exit status 0)",
                self.command
            ),
            _ => write!(
                f,
                "Command '{}' returned non-zero exit status {}",
                self.command, self.exit_codes
            ),
        }
    }
}

impl std::error::Error for CalledProcessError {}
