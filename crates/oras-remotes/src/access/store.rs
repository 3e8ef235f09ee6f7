//! Provider over a Docker-style `config.json` credential file.
//!
//! ```json
//! { "auths": { "registry.example.com": { "auth": "dXNlcjpwYXNz" } } }
//! ```
//!
//! An entry carries either `auth` (base64 `user:password`), explicit
//! `username`/`password`, or an `identitytoken`.

use super::AccessStatus;
use crate::challenge::AuthChallenge;
use crate::error::{RemoteError, Result};
use crate::oauth::{Access, BasicAuthTokenSource};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Username Docker uses to mark an identity-token login.
const IDENTITY_TOKEN_USER: &str = "<token>";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AuthEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identitytoken: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthEntry {
    /// Returns `(username, secret)`.
    fn credentials(&self) -> Option<(String, String)> {
        if let Some(token) = self.identitytoken.as_ref().filter(|t| !t.is_empty()) {
            let username = self
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| IDENTITY_TOKEN_USER.to_string());
            return Some((username, token.clone()));
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            if !username.is_empty() {
                return Some((username.clone(), password.clone()));
            }
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(self.auth.as_deref()?.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }
}

/// `https://index.docker.io/v1/` -> `index.docker.io`
fn normalize_key(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.split('/').next().unwrap_or(key)
}

impl ConfigFile {
    fn find(&self, host: &str) -> Option<(&String, &AuthEntry)> {
        self.auths
            .get_key_value(host)
            .or_else(|| self.auths.iter().find(|(key, _)| normalize_key(key) == host))
    }
}

/// Credentials read from (and revoked in) a JSON credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Uses the credential file at `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.docker/config.json`, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Uses the default credential file.
    #[must_use]
    pub fn from_default_location() -> Option<Self> {
        Self::default_path().map(Self::new)
    }

    /// Returns the credential file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores a username and password for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub async fn login(&self, host: &str, username: &str, password: &str) -> Result<()> {
        let mut config = self.load().await?;
        let auth =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        config.auths.insert(
            host.to_string(),
            AuthEntry {
                auth: Some(auth),
                ..AuthEntry::default()
            },
        );
        self.save(&config).await?;
        info!(host = %host, username = %username, "Stored registry credentials");
        Ok(())
    }

    pub(super) async fn check_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        let config = self.load().await?;
        let known = config
            .find(host)
            .and_then(|(_, entry)| entry.credentials())
            .is_some_and(|(user, _)| user == username);

        if !known {
            return Err(RemoteError::NotLoggedIn {
                host: host.to_string(),
                username: username.to_string(),
            });
        }

        Ok(AccessStatus {
            access_root: self.path.clone(),
            user_key: username.to_string(),
            token_key: host.to_string(),
            image: None,
        })
    }

    pub(super) async fn revoke_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        let mut config = self.load().await?;
        let key = config.find(host).map(|(key, _)| key.clone());

        if let Some(key) = key {
            config.auths.remove(&key);
            self.save(&config).await?;
            info!(host = %host, "Removed registry credentials");
        } else {
            debug!(host = %host, "No credentials to revoke");
        }

        Ok(AccessStatus {
            access_root: self.path.clone(),
            user_key: username.to_string(),
            token_key: host.to_string(),
            image: None,
        })
    }

    pub(super) async fn get_access(
        &self,
        challenge: &AuthChallenge,
        http: &reqwest::Client,
    ) -> Result<Access> {
        let config = self.load().await?;
        let (username, password) = config
            .find(&challenge.service)
            .and_then(|(_, entry)| entry.credentials())
            .ok_or_else(|| RemoteError::AccessDenied {
                realm: challenge.realm.clone(),
                service: challenge.service.clone(),
                scope: challenge.scope.clone(),
                reason: format!(
                    "no credential for {} in {}",
                    challenge.service,
                    self.path.display()
                ),
            })?;

        let source = BasicAuthTokenSource::new(
            &challenge.realm,
            &challenge.service,
            username,
            password,
            &challenge.scope,
            http.clone(),
        );
        Ok(Access::new(Arc::new(source.reusable()), http.clone()))
    }

    async fn load(&self) -> Result<ConfigFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
            Err(e) => Err(RemoteError::io(&self.path, e)),
        }
    }

    async fn save(&self, config: &ConfigFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| RemoteError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn challenge(service: &str) -> AuthChallenge {
        AuthChallenge {
            realm: "https://auth.example.com/token".to_string(),
            service: service.to_string(),
            scope: "repository:library/app:pull".to_string(),
            namespace: "library/app".to_string(),
        }
    }

    #[test]
    fn test_entry_credentials() {
        let encoded = AuthEntry {
            auth: Some("dXNlcjpwYTpzcw==".to_string()),
            ..AuthEntry::default()
        };
        assert_eq!(encoded.credentials(), Some(("user".to_string(), "pa:ss".to_string())));

        let explicit = AuthEntry {
            username: Some("alice".to_string()),
            password: Some("pw".to_string()),
            ..AuthEntry::default()
        };
        assert_eq!(explicit.credentials(), Some(("alice".to_string(), "pw".to_string())));

        let identity = AuthEntry {
            identitytoken: Some("refresh".to_string()),
            ..AuthEntry::default()
        };
        assert_eq!(
            identity.credentials(),
            Some((IDENTITY_TOKEN_USER.to_string(), "refresh".to_string()))
        );

        assert_eq!(AuthEntry::default().credentials(), None);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_key("localhost:5000"), "localhost:5000");
    }

    #[tokio::test]
    async fn test_login_check_revoke() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("docker").join("config.json"));

        assert!(matches!(
            store.check_access("registry.example.com", "alice").await,
            Err(RemoteError::NotLoggedIn { .. })
        ));

        store.login("registry.example.com", "alice", "secret").await.unwrap();
        let status = store.check_access("registry.example.com", "alice").await.unwrap();
        assert_eq!(status.user_key, "alice");
        assert!(store.check_access("registry.example.com", "bob").await.is_err());

        store.revoke_access("registry.example.com", "alice").await.unwrap();
        store.revoke_access("registry.example.com", "alice").await.unwrap();
        assert!(store.check_access("registry.example.com", "alice").await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_keeps_unrelated_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths": {"https://other.example.com/v1/": {"auth": "dTpw"}, "registry.example.com": {"auth": "dTpw"}}, "credsStore": "desktop"}"#,
        )
        .unwrap();

        let store = CredentialStore::new(&path);
        store.revoke_access("registry.example.com", "u").await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["credsStore"], "desktop");
        assert!(written["auths"].get("registry.example.com").is_none());
        assert!(written["auths"].get("https://other.example.com/v1/").is_some());
        assert!(store.check_access("other.example.com", "u").await.is_ok());
    }

    #[tokio::test]
    async fn test_get_access_without_credentials_is_denied() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("config.json"));
        let err = store
            .get_access(&challenge("registry.example.com"), &reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::AccessDenied { .. }));
    }
}
