//! Command execution over SSH
//!
//! [`SshSession::execute_async`] dispatches a command and returns a
//! [`RemoteProcess`] without waiting; everything else builds on it.

use std::collections::BTreeMap;
use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::elevation::{password_line, wrap_sudo_command};
use super::result::CommandResult;
use super::session::SshSession;
use crate::error::{CalledProcessError, RemoteError, Result};

/// Slice for each wait on the channel; an idle slice just waits again
pub const READ_SLICE: Duration = Duration::from_secs(60);

/// Extended data stream id carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// A dispatched command
///
/// Writes go to the command's stdin. Its stdout and stderr are the
/// channel's data and extended-data streams, drained by [`wait`](Self::wait).
pub struct RemoteProcess {
    host: String,
    command: String,
    channel: Channel<Msg>,
}

impl RemoteProcess {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The command as sent to the remote side (after sudo wrapping)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Write to the command's stdin
    pub async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| RemoteError::connection(format!("Failed to write stdin: {}", e)))
    }

    /// Send EOF on the command's stdin
    pub async fn close_stdin(&self) -> Result<()> {
        self.channel
            .eof()
            .await
            .map_err(|e| RemoteError::connection(format!("Failed to close stdin: {}", e)))
    }

    /// Raw access to the underlying channel
    pub fn into_channel(self) -> Channel<Msg> {
        self.channel
    }

    /// Drain stdout and stderr until the channel closes, then collect the exit status.
    ///
    /// EOF does not end the loop: output and the exit status may still
    /// arrive after it. The channel is closed afterwards.
    pub async fn wait(mut self) -> Result<CommandResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<i32> = None;
        let mut closed = false;

        loop {
            let msg = match timeout(READ_SLICE, self.channel.wait()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(_) => {
                    debug!(host = %self.host, "No output for {}s, still waiting", READ_SLICE.as_secs());
                    continue;
                }
            };

            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == SSH_EXTENDED_DATA_STDERR {
                        stderr.extend_from_slice(&data);
                    } else {
                        stdout.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    warn!(host = %self.host, signal = ?signal_name, "Remote command killed by signal");
                }
                ChannelMsg::Close => {
                    closed = true;
                    break;
                }
                _ => {}
            }
        }

        if !closed && exit_code.is_none() {
            return Err(RemoteError::connection(format!(
                "Connection to {} lost while running '{}'",
                self.host, self.command
            )));
        }

        let result = CommandResult::from_bytes(&stdout, &stderr, exit_code.unwrap_or(-1));

        debug!(
            host = %self.host,
            exit_code = result.exit_code(),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Command completed"
        );

        if let Err(e) = self.channel.close().await {
            debug!(host = %self.host, error = %e, "Channel already closed");
        }

        Ok(result)
    }

    /// Wait for completion, discarding output
    pub async fn wait_exit_status(self) -> Result<i32> {
        Ok(self.wait().await?.exit_code())
    }
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("host", &self.host)
            .field("command", &self.command)
            .finish()
    }
}

impl SshSession {
    /// Dispatch a command on a new channel without waiting for it.
    ///
    /// Inside a sudo scope the command is wrapped with sudo; the caller
    /// is then responsible for feeding the password (see [`execute`](Self::execute)).
    pub async fn execute_async(&self, command: &str) -> Result<RemoteProcess> {
        let dispatched = if self.is_sudo() {
            wrap_sudo_command(command, self.sudo_password().is_some())
        } else {
            command.to_string()
        };

        let channel = self.open_channel().await?;

        if self.config().request_pty {
            channel
                .request_pty(false, "xterm", 200, 50, 0, 0, &[])
                .await
                .map_err(|e| RemoteError::connection(format!("Failed to request PTY: {}", e)))?;
        }

        channel
            .exec(true, dispatched.as_str())
            .await
            .map_err(|e| RemoteError::connection(format!("Failed to exec command: {}", e)))?;

        debug!(host = %self.host(), sudo = self.is_sudo(), command = %dispatched, "Command dispatched");

        Ok(RemoteProcess {
            host: self.host().to_string(),
            command: dispatched,
            channel,
        })
    }

    /// Run a command to completion and capture its output
    pub async fn execute(&self, command: &str) -> Result<CommandResult> {
        let process = self.execute_async(command).await?;
        self.push_sudo_password(&process).await?;
        process.wait().await
    }

    /// Run a command, failing with [`CalledProcessError`] on a non-zero exit code
    pub async fn check_call(&self, command: &str) -> Result<CommandResult> {
        let result = self.execute(command).await?;
        if !result.is_ok() {
            return Err(CalledProcessError::new(
                command,
                result.exit_code(),
                result.combined_output(),
            )
            .into());
        }
        Ok(result)
    }

    /// Like [`check_call`](Self::check_call), also failing when anything was written to stderr
    pub async fn check_stderr(&self, command: &str) -> Result<CommandResult> {
        let result = self.check_call(command).await?;
        if !result.stderr().is_empty() {
            return Err(CalledProcessError::new(
                command,
                result.exit_code(),
                result.combined_output(),
            )
            .into());
        }
        Ok(result)
    }

    /// Run one command on several connected sessions at once.
    ///
    /// The command is dispatched on every session before any of them is
    /// waited on. Hosts exiting non-zero are reported together in one
    /// [`CalledProcessError`]; a host whose channel breaks counts as exit
    /// code -1. Results come back in session order.
    pub async fn execute_together(
        sessions: &[&SshSession],
        command: &str,
    ) -> Result<Vec<(String, CommandResult)>> {
        let mut running = Vec::with_capacity(sessions.len());
        for session in sessions {
            let process = session.execute_async(command).await?;
            session.push_sudo_password(&process).await?;
            running.push(process);
        }

        debug!(hosts = running.len(), "Dispatched on all hosts, waiting for exit statuses");

        let mut outcomes = Vec::with_capacity(running.len());
        for process in running {
            let host = process.host().to_string();
            let outcome = process.wait().await;
            if let Err(ref e) = outcome {
                warn!(host = %host, error = %e, "Lost command result");
            }
            outcomes.push((host, outcome));
        }

        collect_outcomes(command, outcomes)
    }

    /// Feed the password to a sudo-wrapped command, once
    async fn push_sudo_password(&self, process: &RemoteProcess) -> Result<()> {
        if !self.is_sudo() {
            return Ok(());
        }
        if let Some(password) = self.sudo_password() {
            process
                .write_stdin(password_line(password).as_bytes())
                .await?;
        }
        Ok(())
    }
}

/// Fold per-host outcomes of a parallel run, in session order.
///
/// Every host is accounted for: failing hosts land in one
/// [`CalledProcessError`] with their output prefixed by `[host] `, and a
/// host whose wait broke counts as exit code -1. A hostname seen twice
/// (another port or proxy) is keyed `host#<position>` the second time.
fn collect_outcomes(
    command: &str,
    outcomes: Vec<(String, Result<CommandResult>)>,
) -> Result<Vec<(String, CommandResult)>> {
    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = BTreeMap::new();
    let mut output = String::new();

    for (position, (host, outcome)) in outcomes.into_iter().enumerate() {
        let key = if failures.contains_key(&host) {
            format!("{}#{}", host, position)
        } else {
            host.clone()
        };

        match outcome {
            Ok(result) => {
                if !result.is_ok() {
                    failures.insert(key, result.exit_code());
                    for line in result.stdout().iter().chain(result.stderr()) {
                        output.push_str(&format!("[{}] {}", host, line));
                        if !line.ends_with('\n') {
                            output.push('\n');
                        }
                    }
                }
                results.push((host, result));
            }
            Err(e) => {
                output.push_str(&format!("[{}] {}\n", host, e));
                failures.insert(key, -1);
            }
        }
    }

    if !failures.is_empty() {
        return Err(CalledProcessError::per_host(command, failures, output).into());
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExitCodes;
    use crate::ssh::config::SshConfig;

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let session = SshSession::new(SshConfig::new("localhost", "testuser"));
        let result = session.execute("true").await;
        assert!(matches!(result, Err(RemoteError::Connection(_))));
    }

    #[tokio::test]
    async fn test_execute_together_with_no_sessions() {
        let results = SshSession::execute_together(&[], "uptime").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_execute_together_fails_on_unconnected_session() {
        let session = SshSession::new(SshConfig::new("localhost", "testuser"));
        let result = SshSession::execute_together(&[&session], "uptime").await;
        assert!(matches!(result, Err(RemoteError::Connection(_))));
    }

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_collect_outcomes_all_ok_keeps_order() {
        let outcomes = vec![
            ("ctl-1".to_string(), Ok(CommandResult::new(lines(&["a\n"]), vec![], 0))),
            ("ctl-0".to_string(), Ok(CommandResult::new(lines(&["b\n"]), vec![], 0))),
        ];
        let results = collect_outcomes("hostname", outcomes).unwrap();
        let hosts: Vec<_> = results.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(hosts, ["ctl-1", "ctl-0"]);
    }

    #[test]
    fn test_collect_outcomes_one_failing_host() {
        let outcomes = vec![
            (
                "ctl-0".to_string(),
                Ok(CommandResult::new(lines(&["fine\n"]), vec![], 0)),
            ),
            (
                "ctl-1".to_string(),
                Ok(CommandResult::new(
                    lines(&["partial\n"]),
                    lines(&["unit not found"]),
                    5,
                )),
            ),
            (
                "ctl-2".to_string(),
                Ok(CommandResult::new(lines(&["fine\n"]), vec![], 0)),
            ),
        ];

        let err = collect_outcomes("systemctl restart nova", outcomes).unwrap_err();
        let failure = err.as_called_process().unwrap();
        let expected: BTreeMap<_, _> = [("ctl-1".to_string(), 5)].into_iter().collect();
        assert_eq!(failure.exit_codes, ExitCodes::PerHost(expected));
        assert_eq!(failure.output, "[ctl-1] partial\n[ctl-1] unit not found\n");
    }

    #[test]
    fn test_collect_outcomes_broken_host_is_minus_one() {
        let outcomes = vec![
            (
                "ctl-0".to_string(),
                Err(RemoteError::connection("channel closed")),
            ),
            ("ctl-1".to_string(), Ok(CommandResult::new(vec![], vec![], 0))),
        ];

        let err = collect_outcomes("uptime", outcomes).unwrap_err();
        let failure = err.as_called_process().unwrap();
        let expected: BTreeMap<_, _> = [("ctl-0".to_string(), -1)].into_iter().collect();
        assert_eq!(failure.exit_codes, ExitCodes::PerHost(expected));
        assert!(failure.output.starts_with("[ctl-0] SSH connection error"));
    }

    #[test]
    fn test_collect_outcomes_same_hostname_twice() {
        let outcomes = vec![
            ("bastion".to_string(), Ok(CommandResult::new(vec![], vec![], 1))),
            ("bastion".to_string(), Ok(CommandResult::new(vec![], vec![], 2))),
        ];

        let err = collect_outcomes("false", outcomes).unwrap_err();
        let failure = err.as_called_process().unwrap();
        let expected: BTreeMap<_, _> = [("bastion".to_string(), 1), ("bastion#1".to_string(), 2)]
            .into_iter()
            .collect();
        assert_eq!(failure.exit_codes, ExitCodes::PerHost(expected));
    }
}
