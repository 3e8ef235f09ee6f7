//! Access layer: how a registry gets authorization.
//!
//! Three providers exist, chosen at construction time:
//!
//! - [`CredentialStore`]: a Docker-style `config.json`.
//! - [`HelperProvider`]: an external `loginrc`/`accessrc` helper pair.
//! - [`OAuth2Provider`]: username and password held in memory.

mod helper;
mod oauth2;
mod store;

pub use helper::HelperProvider;
pub use oauth2::OAuth2Provider;
pub use store::CredentialStore;

use crate::challenge::AuthChallenge;
use crate::error::Result;
use crate::oauth::Access;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the live credentials of an identity are kept. Holds no secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessStatus {
    /// Directory (or store name) holding the credentials.
    #[serde(default, alias = "accessRoot")]
    pub access_root: PathBuf,

    /// Key identifying the user within the access root.
    #[serde(default, alias = "userKey")]
    pub user_key: String,

    /// Key identifying the token within the access root.
    #[serde(default, alias = "tokenKey")]
    pub token_key: String,

    /// Image the status was requested for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "image")]
    pub image: Option<String>,
}

/// A source of registry authorization.
#[derive(Debug, Clone)]
pub enum AccessProvider {
    /// Docker-style credential file.
    CredentialStore(CredentialStore),
    /// External helper executables.
    Helper(HelperProvider),
    /// In-memory credentials exchanged over OAuth2.
    OAuth2(OAuth2Provider),
}

impl AccessProvider {
    /// A provider that asks token endpoints for anonymous tokens.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::OAuth2(OAuth2Provider::anonymous())
    }

    /// Reports the standing credential of `username` at `host`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotLoggedIn`](crate::RemoteError::NotLoggedIn)
    /// if there is none.
    pub async fn check_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        match self {
            Self::CredentialStore(store) => store.check_access(host, username).await,
            Self::Helper(helper) => helper.check_access(host, username).await,
            Self::OAuth2(oauth2) => oauth2.check_access(host, username),
        }
    }

    /// Invalidates the standing credential of `username` at `host`.
    /// Revoking something that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be updated.
    pub async fn revoke_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        match self {
            Self::CredentialStore(store) => store.revoke_access(host, username).await,
            Self::Helper(helper) => helper.revoke_access(host, username).await,
            Self::OAuth2(oauth2) => Ok(oauth2.revoke_access(host, username)),
        }
    }

    /// Resolves a challenge into usable access. Called by the transport on 401.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::AccessDenied`](crate::RemoteError::AccessDenied)
    /// if no credential matches the challenge.
    pub async fn get_access(
        &self,
        challenge: &AuthChallenge,
        http: &reqwest::Client,
    ) -> Result<Access> {
        match self {
            Self::CredentialStore(store) => store.get_access(challenge, http).await,
            Self::Helper(helper) => helper.get_access(challenge, http).await,
            Self::OAuth2(oauth2) => Ok(oauth2.get_access(challenge, http)),
        }
    }
}

impl From<CredentialStore> for AccessProvider {
    fn from(store: CredentialStore) -> Self {
        Self::CredentialStore(store)
    }
}

impl From<HelperProvider> for AccessProvider {
    fn from(helper: HelperProvider) -> Self {
        Self::Helper(helper)
    }
}

impl From<OAuth2Provider> for AccessProvider {
    fn from(oauth2: OAuth2Provider) -> Self {
        Self::OAuth2(oauth2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_status_wire_format() {
        let status: AccessStatus = serde_json::from_str(
            r#"{"AccessRoot": "/tmp/access", "UserKey": "u1", "TokenKey": "t1"}"#,
        )
        .unwrap();
        assert_eq!(status.access_root, PathBuf::from("/tmp/access"));
        assert_eq!(status.user_key, "u1");
        assert_eq!(status.image, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["TokenKey"], "t1");
        assert!(json.get("Image").is_none());
    }

    #[test]
    fn test_access_status_accepts_camel_case() {
        let json = r#"{"accessRoot": "/a", "userKey": "u", "tokenKey": "t", "image": "app"}"#;
        let status: AccessStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.token_key, "t");
        assert_eq!(status.image.as_deref(), Some("app"));
    }
}
