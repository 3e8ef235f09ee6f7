//! Provider over in-memory credentials.

use super::AccessStatus;
use crate::challenge::AuthChallenge;
use crate::error::{RemoteError, Result};
use crate::oauth::{Access, BasicAuthTokenSource};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Exchanges a username and password (or nothing) for bearer tokens.
///
/// Clones share the same credentials, so revoking through one clone is seen
/// by all.
#[derive(Clone, Default)]
pub struct OAuth2Provider {
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl OAuth2Provider {
    /// A provider that logs in as `username`.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Arc::new(RwLock::new(Some(Credentials {
                username: username.into(),
                password: password.into(),
            }))),
        }
    }

    /// A provider that requests anonymous tokens.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub(super) fn check_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        match self.credentials.read().as_ref() {
            Some(credentials) if credentials.username == username => Ok(AccessStatus {
                user_key: username.to_string(),
                token_key: host.to_string(),
                ..AccessStatus::default()
            }),
            _ => Err(RemoteError::NotLoggedIn {
                host: host.to_string(),
                username: username.to_string(),
            }),
        }
    }

    pub(super) fn revoke_access(&self, host: &str, username: &str) -> AccessStatus {
        let mut credentials = self.credentials.write();
        if credentials.as_ref().is_some_and(|c| c.username == username) {
            *credentials = None;
        }
        AccessStatus {
            user_key: username.to_string(),
            token_key: host.to_string(),
            ..AccessStatus::default()
        }
    }

    pub(super) fn get_access(&self, challenge: &AuthChallenge, http: &reqwest::Client) -> Access {
        let (username, password) = self
            .credentials
            .read()
            .as_ref()
            .map(|c| (c.username.clone(), c.password.clone()))
            .unwrap_or_default();

        let source = BasicAuthTokenSource::new(
            &challenge.realm,
            &challenge.service,
            username,
            password,
            &challenge.scope,
            http.clone(),
        );
        Access::new(Arc::new(source.reusable()), http.clone())
    }
}

impl fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let username = self.credentials.read().as_ref().map(|c| c.username.clone());
        f.debug_struct("OAuth2Provider")
            .field("username", &username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_requires_matching_user() {
        let provider = OAuth2Provider::new("alice", "secret");
        let status = provider.check_access("registry.example.com", "alice").unwrap();
        assert_eq!(status.user_key, "alice");
        assert_eq!(status.token_key, "registry.example.com");

        assert!(matches!(
            provider.check_access("registry.example.com", "bob"),
            Err(RemoteError::NotLoggedIn { .. })
        ));
    }

    #[test]
    fn test_revoke_is_idempotent_and_shared() {
        let provider = OAuth2Provider::new("alice", "secret");
        let clone = provider.clone();

        clone.revoke_access("registry.example.com", "alice");
        clone.revoke_access("registry.example.com", "alice");
        assert!(provider.check_access("registry.example.com", "alice").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", OAuth2Provider::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
