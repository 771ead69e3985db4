//! Configuration and CLI argument parsing for the remote-exec binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::error::{RemoteError, Result};
use crate::ssh::{sanitize_password, SshConfig};

/// Default connect timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// remote-exec CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "remote-exec")]
#[command(version)]
#[command(about = "Run commands and transfer files on remote hosts over SSH")]
pub struct Args {
    /// Host(s) to connect to; several hosts run `exec` on all of them at once
    #[arg(long, env = "REMOTE_EXEC_HOST", value_delimiter = ',', required = true)]
    pub host: Vec<String>,

    /// SSH port
    #[arg(long, default_value = "22", env = "REMOTE_EXEC_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "REMOTE_EXEC_USER")]
    pub user: String,

    /// SSH password, also fed to sudo
    #[arg(long, env = "REMOTE_EXEC_PASSWORD")]
    pub password: Option<String>,

    /// Path to an SSH private key; repeatable, tried in order before the password
    #[arg(long = "key", env = "REMOTE_EXEC_KEY", value_delimiter = ',')]
    pub keys: Vec<PathBuf>,

    /// Local proxy command (e.g. "ssh -W %h:%p jumphost"); repeatable, rotated on retries
    #[arg(long = "proxy-command")]
    pub proxy_commands: Vec<String>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "REMOTE_EXEC_TIMEOUT")]
    pub timeout: u64,

    /// Request a pseudo-terminal for commands
    #[arg(long, default_value = "false")]
    pub pty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations exposed by the binary
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Execute a shell command
    Exec {
        /// Run the command with sudo
        #[arg(long)]
        sudo: bool,

        /// Treat output on stderr as failure
        #[arg(long)]
        strict: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Upload a local file or directory
    Upload { source: PathBuf, target: String },

    /// Download a single remote file
    Download { source: String, target: PathBuf },

    /// Create a remote directory (and parents)
    Mkdir { path: String },
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Target hosts
    pub hosts: Vec<String>,

    /// SSH port
    pub port: u16,

    /// SSH username
    pub user: String,

    /// SSH password
    pub password: Option<String>,

    /// Paths to SSH private keys
    pub keys: Vec<PathBuf>,

    /// Proxy commands
    pub proxy_commands: Vec<String>,

    /// Connect timeout
    pub timeout: Duration,

    /// Whether to request a PTY
    pub pty: bool,

    /// What to do once connected
    pub command: Command,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        Ok(Config {
            hosts: args.host,
            port: args.port,
            user: args.user,
            password: sanitize_password(args.password.as_deref()),
            keys: args.keys,
            proxy_commands: args.proxy_commands,
            timeout: Duration::from_secs(args.timeout),
            pty: args.pty,
            command: args.command,
        })
    }

    /// Build one SSH target per host, reading the key files once
    pub async fn ssh_configs(&self) -> Result<Vec<SshConfig>> {
        let mut keys = Vec::with_capacity(self.keys.len());
        for path in &self.keys {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                RemoteError::config(format!("Cannot read key {}: {}", path.display(), e))
            })?;
            keys.push(content);
        }

        Ok(self
            .hosts
            .iter()
            .map(|host| {
                let mut config = SshConfig::new(host, &self.user)
                    .with_port(self.port)
                    .with_timeout(self.timeout)
                    .with_pty(self.pty);
                if let Some(ref password) = self.password {
                    config = config.with_password(password);
                }
                for key in &keys {
                    config = config.with_private_key(key);
                }
                for proxy in &self.proxy_commands {
                    config = config.with_proxy_command(proxy);
                }
                config
            })
            .collect())
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.iter().all(|h| h.trim().is_empty()) {
        errors.push("Missing required --host".to_string());
    }

    if args.user.is_empty() {
        errors.push("Missing required --user".to_string());
    }

    // Must have either password or key
    if sanitize_password(args.password.as_deref()).is_none() && args.keys.is_empty() {
        errors.push("Must provide either --password or --key".to_string());
    }

    for key_path in &args.keys {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.timeout == 0 {
        errors.push("--timeout must be at least 1 second".to_string());
    }

    if !errors.is_empty() {
        return Err(RemoteError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_exec() {
        let args = parse(&[
            "remote-exec", "--host", "node-1", "--user", "stack", "--password", "pw", "exec",
            "--sudo", "ls", "-la", "/root",
        ]);
        assert_eq!(args.host, ["node-1"]);
        assert_eq!(
            args.command,
            Command::Exec {
                sudo: true,
                strict: false,
                json: false,
                command: vec!["ls".into(), "-la".into(), "/root".into()],
            }
        );
    }

    #[test]
    fn test_parse_multiple_hosts_and_proxies() {
        let args = parse(&[
            "remote-exec",
            "--host",
            "ctl-0,ctl-1,ctl-2",
            "--user",
            "stack",
            "--password",
            "pw",
            "--proxy-command",
            "ssh -W %h:%p jump-a",
            "--proxy-command",
            "ssh -W %h:%p jump-b",
            "mkdir",
            "/tmp/x",
        ]);
        assert_eq!(args.host, ["ctl-0", "ctl-1", "ctl-2"]);
        assert_eq!(args.proxy_commands.len(), 2);
        assert_eq!(args.command, Command::Mkdir { path: "/tmp/x".into() });
    }

    #[test]
    fn test_config_requires_credentials() {
        let args = parse(&["remote-exec", "--host", "node-1", "--user", "stack", "mkdir", "/x"]);
        let err = Config::from_args(args).unwrap_err();
        assert!(err.to_string().contains("--password or --key"));
    }

    #[test]
    fn test_config_rejects_missing_key_file() {
        let args = parse(&[
            "remote-exec", "--host", "node-1", "--user", "stack", "--key",
            "/nonexistent/id_rsa", "mkdir", "/x",
        ]);
        let err = Config::from_args(args).unwrap_err();
        assert!(err.to_string().contains("SSH key file not found"));
    }

    #[test]
    fn test_empty_password_is_unset() {
        let args = parse(&[
            "remote-exec", "--host", "node-1", "--user", "stack", "--password", "", "mkdir", "/x",
        ]);
        assert!(Config::from_args(args).is_err());
    }

    #[tokio::test]
    async fn test_ssh_configs_one_per_host() {
        let key_path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/id_ed25519");
        let args = parse(&[
            "remote-exec",
            "--host",
            "ctl-0,ctl-1",
            "--port",
            "2222",
            "--user",
            "stack",
            "--key",
            key_path,
            "--password",
            "pw",
            "--timeout",
            "5",
            "mkdir",
            "/x",
        ]);
        let config = Config::from_args(args).unwrap();
        let targets = config.ssh_configs().await.unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].host, "ctl-1");
        assert_eq!(targets[1].port, 2222);
        assert_eq!(targets[1].private_keys.len(), 1);
        assert_eq!(targets[1].password.as_deref(), Some("pw"));
        assert_eq!(targets[1].timeout, Duration::from_secs(5));
    }
}
