//! SSH Session
//!
//! Connection lifecycle for one remote host: credential and proxy selection,
//! resilient reconnection, best-effort teardown, and the scoped sudo flag.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::Channel;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::SshConfig;
use super::handler::SshHandler;
use super::proxy::ProxyProcess;
use super::retry::RetryPolicy;
use crate::error::{RemoteError, Result};

/// Bound on the SSH banner exchange and key exchange
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(30);

/// One way of authenticating
#[derive(Clone)]
pub enum Credential {
    /// Public key authentication
    Key(Arc<PrivateKey>),

    /// Password authentication
    Password(String),
}

impl Credential {
    fn kind(&self) -> &'static str {
        match self {
            Credential::Key(_) => "key",
            Credential::Password(_) => "password",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(key) => f
                .debug_tuple("Key")
                .field(&key.algorithm().as_str())
                .finish(),
            Credential::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Credentials to try, in order: every private key, then the password.
pub fn credential_candidates(config: &SshConfig) -> Result<Vec<Credential>> {
    let mut candidates = Vec::with_capacity(config.private_keys.len() + 1);

    for key_content in &config.private_keys {
        let key = PrivateKey::from_openssh(key_content.as_bytes())
            .map_err(|e| RemoteError::SshKey(format!("Failed to parse private key: {}", e)))?;
        candidates.push(Credential::Key(Arc::new(key)));
    }

    if let Some(ref password) = config.password {
        candidates.push(Credential::Password(password.clone()));
    }

    if candidates.is_empty() {
        return Err(RemoteError::auth(
            "No authentication method available (require password or private key)",
        ));
    }

    Ok(candidates)
}

/// An authenticated SSH connection, optionally tunneled through a proxy process
struct Transport {
    handle: Handle<SshHandler>,
    proxy: Option<ProxyProcess>,
}

impl Transport {
    /// One handshake and authentication attempt
    async fn open(
        config: &SshConfig,
        credential: &Credential,
        proxy_command: Option<&str>,
    ) -> Result<Self> {
        let ssh_config = Arc::new(client::Config::default());
        let handler = SshHandler::new(&config.host);

        let (mut handle, proxy) = match proxy_command {
            Some(command) => {
                let (proxy, stream) =
                    ProxyProcess::spawn(command, &config.host, config.port, &config.username)?;
                let handle = handshake(ssh_config, stream, handler).await?;
                (handle, Some(proxy))
            }
            None => {
                let addr = (config.host.as_str(), config.port);
                let stream = match timeout(config.timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        return Err(RemoteError::connection(format!(
                            "{}:{}: {}",
                            config.host, config.port, e
                        )))
                    }
                    Err(_) => {
                        return Err(RemoteError::connection(format!(
                            "Connection timeout after {}s",
                            config.timeout.as_secs()
                        )))
                    }
                };
                (handshake(ssh_config, stream, handler).await?, None)
            }
        };

        authenticate(&mut handle, &config.username, credential).await?;

        Ok(Self { handle, proxy })
    }

    /// Try every credential in order; the first that authenticates wins
    async fn open_any(
        config: &SshConfig,
        credentials: &[Credential],
        proxy_command: Option<&str>,
    ) -> Result<Self> {
        let mut last_error = RemoteError::auth("No credentials to try");

        for credential in credentials {
            match Self::open(config, credential, proxy_command).await {
                Ok(transport) => {
                    info!(
                        "Authenticated to {}@{}:{} using {}",
                        config.username,
                        config.host,
                        config.port,
                        credential.kind()
                    );
                    return Ok(transport);
                }
                Err(e) => {
                    debug!(
                        host = %config.host,
                        credential = credential.kind(),
                        error = %e,
                        "Connection attempt failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

async fn handshake<S>(
    config: Arc<client::Config>,
    stream: S,
    handler: SshHandler,
) -> Result<Handle<SshHandler>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match timeout(BANNER_TIMEOUT, client::connect_stream(config, stream, handler)).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => Err(RemoteError::connection(e.to_string())),
        Err(_) => Err(RemoteError::connection(format!(
            "Error reading SSH protocol banner within {}s",
            BANNER_TIMEOUT.as_secs()
        ))),
    }
}

async fn authenticate(
    handle: &mut Handle<SshHandler>,
    username: &str,
    credential: &Credential,
) -> Result<()> {
    let auth_result = match credential {
        Credential::Key(key) => {
            let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
            let key_with_alg = PrivateKeyWithHashAlg::new(key.clone(), hash_alg);
            handle
                .authenticate_publickey(username, key_with_alg)
                .await
                .map_err(|e| RemoteError::auth(e.to_string()))?
        }
        Credential::Password(password) => handle
            .authenticate_password(username, password)
            .await
            .map_err(|e| RemoteError::auth(e.to_string()))?,
    };

    if auth_result.success() {
        Ok(())
    } else {
        Err(RemoteError::auth(format!(
            "{} authentication rejected for user '{}'",
            credential.kind(),
            username
        )))
    }
}

/// SSH Session
///
/// Constructed inert; [`enter`](Self::enter) connects (with retries) and
/// [`exit`](Self::exit) releases everything. A session holds at most one
/// transport and at most one SFTP channel, which is opened on first use.
///
/// Dropping a session also ends its transport and kills its proxy process.
pub struct SshSession {
    config: SshConfig,

    /// Active SSH connection handle
    handle: Option<Handle<SshHandler>>,

    /// Proxy process the transport is tunneled through
    proxy: Option<ProxyProcess>,

    /// File-transfer channel, opened lazily by file_transfer.rs
    pub(crate) sftp: OnceCell<SftpSession>,

    /// Set while a [`SudoGuard`] is alive
    sudo: bool,

    retry: RetryPolicy,
}

impl SshSession {
    /// Create a session. No network I/O happens until `connect`, `reconnect` or `enter`.
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            handle: None,
            proxy: None,
            sftp: OnceCell::new(),
            sudo: false,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the reconnect retry policy (default: 3 attempts, 3s apart)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a session and enter it
    pub async fn open(config: SshConfig) -> Result<Self> {
        let mut session = Self::new(config);
        session.enter().await?;
        Ok(session)
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Whether commands are currently wrapped with sudo
    pub fn is_sudo(&self) -> bool {
        self.sudo
    }

    /// Check if the transport is live
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_closed())
    }

    pub(crate) fn sudo_password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    /// Single connection attempt with one credential.
    ///
    /// Uses the first proxy command, if any. Any previous transport is
    /// released first.
    pub async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.clear().await;

        let transport =
            Transport::open(&self.config, credential, self.config.proxy_for_attempt(0)).await?;
        self.install(transport);

        info!(
            "Successfully connected to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );
        Ok(())
    }

    /// Resilient (re)connection.
    ///
    /// Each attempt tries every key, then the password. Attempt `n` goes
    /// through proxy command `n % len` when proxies are configured.
    ///
    /// The previous transport is released first, so the session is never
    /// left connected after a failed reconnect.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.clear().await;
        let credentials = credential_candidates(&self.config)?;

        info!(
            "Connecting to SSH server {}:{}...",
            self.config.host, self.config.port
        );

        let config = &self.config;
        let credentials = &credentials;
        let result = self
            .retry
            .run_with_attempt("reconnect", |attempt| {
                let proxy_command = config.proxy_for_attempt(attempt);
                if let Some(command) = proxy_command {
                    debug!(attempt, proxy = %command, "Using proxy command");
                }
                async move { Transport::open_any(config, credentials, proxy_command).await }
            })
            .await;

        match result {
            Ok(transport) => {
                self.install(transport);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to connect to {}:{} after {} attempts: {}",
                    self.config.host,
                    self.config.port,
                    self.retry.attempts.max(1),
                    e
                );
                Err(e)
            }
        }
    }

    /// Scoped acquisition: reconnect, releasing everything if that fails
    pub async fn enter(&mut self) -> Result<&mut Self> {
        if let Err(e) = self.reconnect().await {
            self.clear().await;
            return Err(e);
        }
        Ok(self)
    }

    /// End of the scope started by [`enter`](Self::enter)
    pub async fn exit(&mut self) {
        self.clear().await;
    }

    /// Release the SFTP channel, the transport and the proxy process.
    ///
    /// Idempotent. Never fails: each release is attempted on its own and
    /// failures are only logged.
    pub async fn clear(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                warn!(host = %self.config.host, error = %e, "Failed to close SFTP channel");
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await
            {
                warn!(host = %self.config.host, error = %e, "Failed to close SSH connection");
            } else {
                info!("SSH connection to {} closed", self.config.host);
            }
        }

        if let Some(proxy) = self.proxy.take() {
            if let Err(e) = proxy.terminate().await {
                warn!(host = %self.config.host, error = %e, "Failed to stop proxy command");
            }
        }
    }

    /// Run commands with sudo until the returned guard is dropped
    pub fn get_sudo(&mut self) -> SudoGuard<'_> {
        self.sudo = true;
        SudoGuard { session: self }
    }

    /// Open a new session channel, bounded by the configured timeout
    pub async fn open_channel(&self) -> Result<Channel<Msg>> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| RemoteError::connection("SSH connection not established"))?;

        match timeout(self.config.timeout, handle.channel_open_session()).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(RemoteError::connection(format!(
                "Failed to open channel: {}",
                e
            ))),
            Err(_) => Err(RemoteError::Timeout(self.config.timeout.as_millis() as u64)),
        }
    }

    fn install(&mut self, transport: Transport) {
        self.handle = Some(transport.handle);
        self.proxy = transport.proxy;
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .field("connected", &self.is_connected())
            .field("sudo", &self.sudo)
            .finish()
    }
}

/// Scoped sudo mode.
///
/// Every command issued through the guard (it derefs to the session) is
/// wrapped with sudo. The flag is reset when the guard is dropped, on any
/// exit path.
pub struct SudoGuard<'a> {
    session: &'a mut SshSession,
}

impl Deref for SudoGuard<'_> {
    type Target = SshSession;

    fn deref(&self) -> &SshSession {
        self.session
    }
}

impl DerefMut for SudoGuard<'_> {
    fn deref_mut(&mut self) -> &mut SshSession {
        self.session
    }
}

impl Drop for SudoGuard<'_> {
    fn drop(&mut self) {
        self.session.sudo = false;
    }
}
