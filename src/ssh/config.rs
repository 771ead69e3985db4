//! SSH target configuration
//!
//! Describes one remote host: address, credentials, proxy hops and timeout.

use std::time::Duration;

/// Default connect timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH connection configuration
#[derive(Clone)]
pub struct SshConfig {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for password authentication and sudo
    pub password: Option<String>,

    /// Private key contents (not paths!), tried in order before the password
    pub private_keys: Vec<String>,

    /// Local proxy commands; attempt `n` of a reconnect uses entry `n % len`
    pub proxy_commands: Vec<String>,

    /// Connect timeout, also bounds channel setup
    pub timeout: Duration,

    /// Request a pseudo-terminal for every command channel
    pub request_pty: bool,
}

impl SshConfig {
    /// Create a new SSH configuration with minimal required fields
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            private_keys: Vec::new(),
            proxy_commands: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            request_pty: false,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Append a private key (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_keys.push(key.into());
        self
    }

    /// Append a proxy command
    pub fn with_proxy_command(mut self, command: impl Into<String>) -> Self {
        self.proxy_commands.push(command.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pty(mut self, request_pty: bool) -> Self {
        self.request_pty = request_pty;
        self
    }

    /// Proxy command to use for the given zero-based reconnect attempt
    pub fn proxy_for_attempt(&self, attempt: usize) -> Option<&str> {
        if self.proxy_commands.is_empty() {
            return None;
        }
        Some(self.proxy_commands[attempt % self.proxy_commands.len()].as_str())
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_keys", &self.private_keys.len())
            .field("proxy_commands", &self.proxy_commands)
            .field("timeout", &self.timeout)
            .field("request_pty", &self.request_pty)
            .finish()
    }
}
