//! Server host key verification

use std::path::{Path, PathBuf};

use russh::keys::ssh_key::{HashAlg, PublicKey};
use tracing::{debug, info, warn};

/// How the client decides whether to trust a server's host key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Require the key to be listed in a known_hosts file
    /// (`~/.ssh/known_hosts` when no path is given)
    #[default]
    KnownHosts,
    /// Like `KnownHosts`, but keys for hosts never seen before are appended
    /// to the file and accepted
    TrustOnFirstUse,
    /// Require the key's SHA256 fingerprint to match exactly
    Fingerprint(String),
    /// Accept any key (insecure)
    AcceptAny,
}

/// Outcome of checking a host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyVerdict {
    /// Key matched a trusted entry
    Trusted,
    /// Key was unknown and has been recorded
    Learned,
    /// No entry exists for this host
    Unknown,
    /// Key conflicts with a trusted entry, or the check failed
    Rejected(String),
}

impl KeyVerdict {
    /// Whether the connection may proceed
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, KeyVerdict::Trusted | KeyVerdict::Learned)
    }
}

/// Verifies host keys for one policy and known_hosts file
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl HostKeyVerifier {
    /// Create a verifier; `known_hosts` overrides `~/.ssh/known_hosts`
    #[must_use]
    pub fn new(policy: HostKeyPolicy, known_hosts: Option<PathBuf>) -> Self {
        let known_hosts =
            known_hosts.or_else(|| dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")));
        Self {
            policy,
            known_hosts,
        }
    }

    /// Active policy
    #[must_use]
    pub fn policy(&self) -> &HostKeyPolicy {
        &self.policy
    }

    /// Check `key` presented by `host:port`
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> KeyVerdict {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(host, port, "accepting host key without verification");
                KeyVerdict::Trusted
            }
            HostKeyPolicy::Fingerprint(expected) => {
                let actual = fingerprint(key);
                if fingerprints_match(expected, &actual) {
                    KeyVerdict::Trusted
                } else {
                    KeyVerdict::Rejected(format!(
                        "fingerprint {actual} does not match pinned {expected}"
                    ))
                }
            }
            HostKeyPolicy::KnownHosts => match self.known_hosts.as_deref() {
                Some(path) => check_file(path, host, port, key),
                None => KeyVerdict::Rejected("no known_hosts file available".to_string()),
            },
            HostKeyPolicy::TrustOnFirstUse => {
                let Some(path) = self.known_hosts.as_deref() else {
                    return KeyVerdict::Rejected("no known_hosts file available".to_string());
                };
                match check_file(path, host, port, key) {
                    KeyVerdict::Unknown => learn(path, host, port, key),
                    verdict => verdict,
                }
            }
        }
    }
}

/// SHA256 fingerprint in OpenSSH form (`SHA256:...`)
#[must_use]
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

fn fingerprints_match(expected: &str, actual: &str) -> bool {
    let strip = |s: &str| {
        s.trim()
            .trim_start_matches("SHA256:")
            .trim_end_matches('=')
            .to_string()
    };
    strip(expected) == strip(actual)
}

fn check_file(path: &Path, host: &str, port: u16, key: &PublicKey) -> KeyVerdict {
    if !path.exists() {
        debug!(path = %path.display(), "known_hosts file does not exist");
        return KeyVerdict::Unknown;
    }
    match russh::keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => KeyVerdict::Trusted,
        Ok(false) => KeyVerdict::Unknown,
        Err(e) => KeyVerdict::Rejected(e.to_string()),
    }
}

fn learn(path: &Path, host: &str, port: u16, key: &PublicKey) -> KeyVerdict {
    match russh::keys::known_hosts::learn_known_hosts_path(host, port, key, path) {
        Ok(()) => {
            info!(
                host,
                port,
                fingerprint = %fingerprint(key),
                "learned new host key"
            );
            KeyVerdict::Learned
        }
        Err(e) => KeyVerdict::Rejected(format!("failed to record host key: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g";
    const KEY_B: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1+f4CBgoOE";

    fn key(b64: &str) -> PublicKey {
        russh::keys::parse_public_key_base64(b64).unwrap()
    }

    #[test]
    fn test_default_policy_is_known_hosts() {
        assert_eq!(HostKeyPolicy::default(), HostKeyPolicy::KnownHosts);
    }

    #[test]
    fn test_fingerprint_policy() {
        let key_a = key(KEY_A);
        let pinned = fingerprint(&key_a);
        assert!(pinned.starts_with("SHA256:"));

        let verifier = HostKeyVerifier::new(HostKeyPolicy::Fingerprint(pinned), None);
        assert_eq!(verifier.verify("web1", 22, &key_a), KeyVerdict::Trusted);
        assert!(matches!(
            verifier.verify("web1", 22, &key(KEY_B)),
            KeyVerdict::Rejected(_)
        ));
    }

    #[test]
    fn test_fingerprint_prefix_is_optional() {
        let actual = "SHA256:mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4";
        assert!(fingerprints_match(
            "mKqU+0K8OhKmA8bBQi9Rz0Q5l7/g160hIP+rJYSTNj4=",
            actual
        ));
        assert!(!fingerprints_match("SHA256:other", actual));
    }

    #[test]
    fn test_known_hosts_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let verifier = HostKeyVerifier::new(HostKeyPolicy::KnownHosts, Some(path.clone()));
        let verdict = verifier.verify("web1", 22, &key(KEY_A));

        assert_eq!(verdict, KeyVerdict::Unknown);
        assert!(!verdict.is_accepted());
        assert!(!path.exists());
    }

    #[test]
    fn test_trust_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let verifier = HostKeyVerifier::new(HostKeyPolicy::TrustOnFirstUse, Some(path.clone()));

        assert_eq!(verifier.verify("web1", 2222, &key(KEY_A)), KeyVerdict::Learned);
        assert_eq!(verifier.verify("web1", 2222, &key(KEY_A)), KeyVerdict::Trusted);
        assert!(matches!(
            verifier.verify("web1", 2222, &key(KEY_B)),
            KeyVerdict::Rejected(_)
        ));

        let strict = HostKeyVerifier::new(HostKeyPolicy::KnownHosts, Some(path));
        assert_eq!(strict.verify("web1", 2222, &key(KEY_A)), KeyVerdict::Trusted);
    }

    #[test]
    fn test_accept_any() {
        let verifier = HostKeyVerifier::new(HostKeyPolicy::AcceptAny, None);
        assert!(verifier.verify("web1", 22, &key(KEY_B)).is_accepted());
    }
}
