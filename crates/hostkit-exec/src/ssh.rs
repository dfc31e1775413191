//! SSH sessions using russh crate

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hostkit_types::HostRecord;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::{RemoteSession, SessionFactory};
use crate::verify::{HostKeyPolicy, HostKeyVerifier, KeyVerdict};

/// SSH client handler for russh
pub struct SshClientHandler {
    address: String,
    port: u16,
    verifier: HostKeyVerifier,
    verdict: Arc<Mutex<Option<KeyVerdict>>>,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let verdict = self
            .verifier
            .verify(&self.address, self.port, server_public_key);
        let accepted = verdict.is_accepted();

        if !accepted {
            warn!(
                address = %self.address,
                port = self.port,
                verdict = ?verdict,
                "host key rejected"
            );
        }

        *self.verdict.lock().unwrap_or_else(PoisonError::into_inner) = Some(verdict);
        Ok(accepted)
    }
}

/// Options shared by every SSH session a factory opens
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    /// Host key policy for hosts without a pinned fingerprint
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file, `~/.ssh/known_hosts` when unset
    pub known_hosts: Option<PathBuf>,
    /// Pinned `SHA256:` fingerprints by host name
    pub pinned_fingerprints: HashMap<String, String>,
    /// Limit on dial plus key exchange; unbounded when unset
    pub connect_timeout: Option<Duration>,
}

impl SshOptions {
    /// Set host key policy
    #[must_use]
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Pin the host key fingerprint for one host
    #[must_use]
    pub fn with_pinned_fingerprint(
        mut self,
        host: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        self.pinned_fingerprints
            .insert(host.into(), fingerprint.into());
        self
    }

    /// Set connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }
}

/// Credentials resolved before dialing
enum Credentials {
    Password(String),
    Key(PrivateKey),
}

impl Credentials {
    /// Password wins over key path when both are set
    fn resolve(host: &HostRecord) -> Result<Self, ExecError> {
        if let Some(password) = host.password.as_deref().filter(|p| !p.is_empty()) {
            return Ok(Credentials::Password(password.to_string()));
        }

        let Some(key_path) = host.key_path.as_deref().filter(|k| !k.is_empty()) else {
            return Err(ExecError::AuthenticationFailed(format!(
                "host {} has no password or key path",
                host.name
            )));
        };

        let key = load_secret_key(key_path, None).map_err(|e| ExecError::KeyLoad {
            path: key_path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Credentials::Key(key))
    }
}

/// Opens SSH sessions for host records
///
/// Every call to [`SshSessionFactory::connect`] dials a fresh connection;
/// nothing is pooled.
pub struct SshSessionFactory {
    config: Arc<client::Config>,
    options: SshOptions,
}

impl std::fmt::Debug for SshSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSessionFactory")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SshSessionFactory {
    /// Create a factory with the given options
    #[must_use]
    pub fn new(options: SshOptions) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            options,
        }
    }

    fn verifier_for(&self, host: &HostRecord) -> HostKeyVerifier {
        let policy = match self.options.pinned_fingerprints.get(&host.name) {
            Some(fingerprint) => HostKeyPolicy::Fingerprint(fingerprint.clone()),
            None => self.options.host_key_policy.clone(),
        };
        HostKeyVerifier::new(policy, self.options.known_hosts.clone())
    }

    /// Connect and authenticate to `host`
    ///
    /// # Errors
    /// Returns `ExecError::KeyLoad` if the private key cannot be loaded,
    /// `ExecError::ConnectionFailed` or `ExecError::HostKeyRejected` if the
    /// transport cannot be established, and
    /// `ExecError::AuthenticationFailed` if the server refuses the
    /// credentials
    #[instrument(skip(self, host), fields(host = %host.name))]
    pub async fn connect(&self, host: &HostRecord) -> Result<SshSession, ExecError> {
        let credentials = Credentials::resolve(host)?;
        let endpoint = host.endpoint();

        info!(endpoint = %endpoint, user = %host.user, "connecting to SSH");

        let verdict = Arc::new(Mutex::new(None));
        let handler = SshClientHandler {
            address: host.address.clone(),
            port: host.port,
            verifier: self.verifier_for(host),
            verdict: Arc::clone(&verdict),
        };

        let connecting = client::connect(
            Arc::clone(&self.config),
            (host.address.as_str(), host.port),
            handler,
        );

        let connected = match self.options.connect_timeout {
            Some(limit) => {
                timeout(limit, connecting)
                    .await
                    .map_err(|_| ExecError::ConnectionFailed {
                        endpoint: endpoint.clone(),
                        reason: format!("timed out after {limit:?}"),
                    })?
            }
            None => connecting.await,
        };

        let mut handle = connected.map_err(|e| match e {
            russh::Error::UnknownKey => ExecError::HostKeyRejected {
                endpoint: endpoint.clone(),
                reason: rejection_reason(&verdict),
            },
            other => ExecError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: other.to_string(),
            },
        })?;

        authenticate(&mut handle, &host.user, credentials).await?;

        info!(endpoint = %endpoint, "SSH connected and authenticated");

        Ok(SshSession {
            handle,
            host: host.name.clone(),
        })
    }
}

fn rejection_reason(verdict: &Mutex<Option<KeyVerdict>>) -> String {
    match &*verdict.lock().unwrap_or_else(PoisonError::into_inner) {
        Some(KeyVerdict::Unknown) => "host is not in known_hosts".to_string(),
        Some(KeyVerdict::Rejected(reason)) => reason.clone(),
        _ => "unknown host key".to_string(),
    }
}

async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    user: &str,
    credentials: Credentials,
) -> Result<(), ExecError> {
    let auth_res = match credentials {
        Credentials::Password(password) => {
            debug!(user, "authenticating with password");
            handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
        }
        Credentials::Key(key_pair) => {
            debug!(user, "authenticating with private key");
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            handle
                .authenticate_publickey(
                    user,
                    PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
        }
    };

    if !auth_res.success() {
        return Err(ExecError::AuthenticationFailed(format!(
            "server rejected credentials for user {user}"
        )));
    }
    Ok(())
}

/// One authenticated SSH connection
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
    host: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Name of the host this session is connected to
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn handle(&self) -> &client::Handle<SshClientHandler> {
        &self.handle
    }

    /// Run `command` on a new exec channel and collect its output
    ///
    /// # Errors
    /// Returns `ExecError::Channel` if the channel cannot be opened or the
    /// exec request fails
    #[instrument(skip(self, command), fields(host = %self.host))]
    pub async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        debug!(command = %command, "executing remote command");

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Channel(e.to_string()))?;

        let mut output = CommandOutput::default();

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    output.stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        output.stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    output.exit_status = Some(exit_status);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    output.exit_signal = Some(format!("{signal_name:?}"));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        debug!(
            command = %command,
            exit_status = ?output.exit_status,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "remote command completed"
        );

        Ok(output)
    }

    /// Disconnect from the remote host
    pub async fn disconnect(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!(host = %self.host, error = %e, "SSH disconnect failed");
        } else {
            debug!(host = %self.host, "SSH disconnected");
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        self.run(command).await
    }

    async fn close(self: Box<Self>) {
        self.disconnect().await;
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn open(&self, host: &HostRecord) -> Result<Box<dyn RemoteSession>, ExecError> {
        Ok(Box::new(self.connect(host).await?))
    }

    fn factory_type(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_unreadable_key_fails_before_dialing() {
        let factory = SshSessionFactory::new(SshOptions::default());
        let host = HostRecord::new("web1", "root", "192.0.2.1")
            .with_key_path("/nonexistent/hostkit/id_ed25519");

        let err = factory.connect(&host).await.unwrap_err();

        assert!(matches!(err, ExecError::KeyLoad { .. }));
        assert!(err.is_session_error());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let factory = SshSessionFactory::new(
            SshOptions::default().with_connect_timeout(Duration::from_secs(5)),
        );
        let host = HostRecord::new("down", "root", "127.0.0.1")
            .with_port(closed_port())
            .with_password("pw");

        let err = factory.connect(&host).await.unwrap_err();

        assert!(matches!(err, ExecError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_pinned_fingerprint_overrides_policy() {
        let factory = SshSessionFactory::new(
            SshOptions::default()
                .with_host_key_policy(HostKeyPolicy::TrustOnFirstUse)
                .with_pinned_fingerprint("web1", "SHA256:abc"),
        );

        let pinned = HostRecord::new("web1", "root", "10.0.0.1");
        let other = HostRecord::new("web2", "root", "10.0.0.2");

        assert_eq!(
            factory.verifier_for(&pinned).policy(),
            &HostKeyPolicy::Fingerprint("SHA256:abc".to_string())
        );
        assert_eq!(
            factory.verifier_for(&other).policy(),
            &HostKeyPolicy::TrustOnFirstUse
        );
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_run_against_local_sshd() {
        let factory = SshSessionFactory::new(
            SshOptions::default().with_host_key_policy(HostKeyPolicy::TrustOnFirstUse),
        );
        let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
        let key = dirs::home_dir()
            .unwrap()
            .join(".ssh/id_ed25519")
            .display()
            .to_string();
        let host = HostRecord::new("localhost", user, "127.0.0.1").with_key_path(key);

        let session = factory.connect(&host).await.unwrap();
        let output = session.run("echo hello").await.unwrap();
        session.disconnect().await;

        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(output.exit_status, Some(0));
    }
}
