//! russh client handler
//!
//! Implements `russh::client::Handler` for sessions opened by [`SshSession`](super::SshSession).

use tracing::debug;

/// SSH client handler for russh
///
/// Test-cluster nodes are reinstalled and re-keyed routinely, so every
/// server key is accepted. The fingerprint is logged for diagnostics.
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
}

impl SshHandler {
    /// Create a handler for connections to `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(russh::keys::HashAlg::Sha256),
            "Accepting server host key"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_creation() {
        let handler = SshHandler::new("controller-0");
        assert_eq!(handler.host(), "controller-0");
        assert!(format!("{:?}", handler).contains("SshHandler"));
    }
}
