//! Privilege elevation utilities for remote command execution
//!
//! Commands issued inside a [`SudoGuard`](super::session::SudoGuard) scope are
//! rewritten by [`wrap_sudo_command`]. When a password is available, sudo reads
//! it from the command's stdin, which the execution engine feeds once right
//! after dispatch.

/// Wraps a command for execution with sudo privileges.
///
/// # Arguments
/// * `command` - The command to wrap with sudo
/// * `reads_password` - If true, uses `sudo -S -p ''` so the password is read
///   from stdin without a prompt. If false, uses `sudo -n` (passwordless).
///
/// # Examples
///
/// ```
/// use remote_exec::ssh::elevation::wrap_sudo_command;
///
/// let cmd = wrap_sudo_command("whoami", true);
/// assert_eq!(cmd, "sudo -S -p '' sh -c \"whoami\"");
///
/// let cmd = wrap_sudo_command("echo \"hi\"", false);
/// assert_eq!(cmd, "sudo -n sh -c \"echo \\\"hi\\\"\"");
/// ```
pub fn wrap_sudo_command(command: &str, reads_password: bool) -> String {
    let escaped_command = escape_double_quotes(command);

    if reads_password {
        format!("sudo -S -p '' sh -c \"{}\"", escaped_command)
    } else {
        format!("sudo -n sh -c \"{}\"", escaped_command)
    }
}

/// Escapes double quotes so `s` can be embedded in a double-quoted shell word.
///
/// Only `"` is touched. `$` and backticks stay live inside the double
/// quotes, so the remote login shell expands them as the SSH user before
/// sudo runs: `$HOME` is the login user's home, not root's. Escape them
/// (`\$HOME`) to have the root subshell expand them instead.
///
/// # Examples
///
/// ```
/// use remote_exec::ssh::elevation::escape_double_quotes;
///
/// assert_eq!(escape_double_quotes("hello"), "hello");
/// assert_eq!(escape_double_quotes("say \"hi\""), "say \\\"hi\\\"");
/// ```
pub fn escape_double_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Line written to stdin of a sudo-wrapped command
pub(crate) fn password_line(password: &str) -> String {
    format!("{}\n", password)
}

/// Sanitizes a password.
///
/// Returns `None` if the password is empty or contains a newline or null
/// byte, none of which can be passed through `sudo -S` as a single line.
pub fn sanitize_password(password: Option<&str>) -> Option<String> {
    password
        .filter(|p| !p.is_empty() && !p.contains(['\n', '\r', '\0']))
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_sudo_command_with_password() {
        let result = wrap_sudo_command("whoami", true);
        assert_eq!(result, "sudo -S -p '' sh -c \"whoami\"");
        assert_ne!(result, "whoami");
    }

    #[test]
    fn test_wrap_sudo_command_without_password() {
        let result = wrap_sudo_command("apt update", false);
        assert_eq!(result, "sudo -n sh -c \"apt update\"");
    }

    #[test]
    fn test_wrap_sudo_command_escapes_double_quotes() {
        let result = wrap_sudo_command("echo \"a b\" > /tmp/x", true);
        assert_eq!(result, "sudo -S -p '' sh -c \"echo \\\"a b\\\" > /tmp/x\"");
    }

    #[test]
    fn test_wrap_sudo_command_keeps_single_quotes() {
        let result = wrap_sudo_command("grep 'root' /etc/shadow", true);
        assert_eq!(result, "sudo -S -p '' sh -c \"grep 'root' /etc/shadow\"");
    }

    #[test]
    fn test_wrap_sudo_command_leaves_dollar_for_login_shell() {
        let result = wrap_sudo_command("echo $HOME \\$HOME", true);
        assert_eq!(result, "sudo -S -p '' sh -c \"echo $HOME \\$HOME\"");
    }

    #[test]
    fn test_escape_double_quotes_multiple() {
        assert_eq!(escape_double_quotes("\"a\" \"b\""), "\\\"a\\\" \\\"b\\\"");
    }

    #[test]
    fn test_password_line() {
        assert_eq!(password_line("secret"), "secret\n");
    }

    #[test]
    fn test_sanitize_password() {
        assert_eq!(sanitize_password(Some("secret")), Some("secret".to_string()));
        assert_eq!(
            sanitize_password(Some(" spaced ")),
            Some(" spaced ".to_string())
        );
        assert_eq!(sanitize_password(Some("")), None);
        assert_eq!(sanitize_password(Some("two\nlines")), None);
        assert_eq!(sanitize_password(Some("has\0null")), None);
        assert_eq!(sanitize_password(None), None);
    }
}
