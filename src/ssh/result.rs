//! Captured outcome of a remote command

use serde::Serialize;

/// Output from a completed command execution
///
/// Lines keep their terminators. Exit code is `-1` when the remote side
/// closed the channel without reporting a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_code: i32,
}

impl CommandResult {
    pub fn new(stdout: Vec<String>, stderr: Vec<String>, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Build a result from raw channel buffers
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_code: i32) -> Self {
        Self::new(split_lines(stdout), split_lines(stderr), exit_code)
    }

    pub fn stdout(&self) -> &[String] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[String] {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// True when the command exited with status 0
    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout joined into one string, trailing whitespace stripped
    pub fn stdout_string(&self) -> String {
        self.stdout.concat().trim_end().to_string()
    }

    /// Stderr joined into one string, trailing whitespace stripped
    pub fn stderr_string(&self) -> String {
        self.stderr.concat().trim_end().to_string()
    }

    /// Stdout lines followed by stderr lines
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.concat();
        out.push_str(&self.stderr.concat());
        out
    }
}

fn split_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buf)
        .split_inclusive('\n')
        .map(str::to_string)
        .collect()
}
