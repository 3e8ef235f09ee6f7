//! Provider backed by external helper executables.
//!
//! The login helper is invoked as:
//!
//! ```text
//! loginrc status <host> <user>                 # JSON AccessStatus, or "Anonymous"
//! loginrc revoke <host> <user>                 # JSON AccessStatus
//! loginrc challenge <realm> <service> <scope>  # JSON AccessStatus
//! ```
//!
//! The token itself comes from the `accessrc` executable inside the returned
//! access root:
//!
//! ```text
//! accessrc get-user <userKey>
//! accessrc get-access-token <service> <user> <tokenKey> <scope>
//! ```

use super::AccessStatus;
use crate::challenge::AuthChallenge;
use crate::config::AccessConfig;
use crate::error::{RemoteError, Result};
use crate::oauth::{Access, StaticTokenSource};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

const ANONYMOUS: &str = "Anonymous";

/// Runs the login helper and the per-root `accessrc` token helper.
#[derive(Debug, Clone)]
pub struct HelperProvider {
    loginrc: PathBuf,
    config: AccessConfig,
}

impl HelperProvider {
    /// Uses `loginrc` as the login helper.
    #[must_use]
    pub fn new(loginrc: impl Into<PathBuf>, config: AccessConfig) -> Self {
        Self {
            loginrc: loginrc.into(),
            config,
        }
    }

    /// Uses the `loginrc` inside the configured login directory.
    #[must_use]
    pub fn from_config(config: AccessConfig) -> Option<Self> {
        let loginrc = config.login_helper()?;
        Some(Self::new(loginrc, config))
    }

    /// Returns the login helper path.
    #[must_use]
    pub fn loginrc(&self) -> &Path {
        &self.loginrc
    }

    pub(super) async fn check_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        let output = run(&self.loginrc, &["status", host, username], true).await?;

        if output == ANONYMOUS {
            let not_logged_in = || RemoteError::NotLoggedIn {
                host: host.to_string(),
                username: username.to_string(),
            };
            let access_root = self.config.access_root().ok_or_else(not_logged_in)?;
            let is_dir = tokio::fs::metadata(&access_root)
                .await
                .is_ok_and(|m| m.is_dir());
            if !is_dir {
                debug!(path = %access_root.display(), "Access root is missing");
                return Err(not_logged_in());
            }
            return Ok(AccessStatus {
                access_root,
                ..AccessStatus::default()
            });
        }

        decode_status(&self.loginrc, "status", &output)
    }

    pub(super) async fn revoke_access(&self, host: &str, username: &str) -> Result<AccessStatus> {
        let output = run(&self.loginrc, &["revoke", host, username], false).await?;
        decode_status(&self.loginrc, "revoke", &output)
    }

    pub(super) async fn get_access(
        &self,
        challenge: &AuthChallenge,
        http: &reqwest::Client,
    ) -> Result<Access> {
        let output = run(
            &self.loginrc,
            &["challenge", &challenge.realm, &challenge.service, &challenge.scope],
            false,
        )
        .await
        .map_err(|e| denied(challenge, e.to_string()))?;
        let status = decode_status(&self.loginrc, "challenge", &output)?;

        let accessrc = status.access_root.join("accessrc");
        if !tokio::fs::try_exists(&accessrc).await.unwrap_or(false) {
            return Err(denied(challenge, format!("{} does not exist", accessrc.display())));
        }

        let user = run(&accessrc, &["get-user", &status.user_key], false).await?;
        let token = run(
            &accessrc,
            &[
                "get-access-token",
                &challenge.service,
                &user,
                &status.token_key,
                &challenge.scope,
            ],
            false,
        )
        .await?;

        if token.is_empty() {
            return Err(denied(challenge, "helper returned an empty token".to_string()));
        }

        Ok(Access::new(Arc::new(StaticTokenSource::new(token)), http.clone()))
    }
}

fn denied(challenge: &AuthChallenge, reason: String) -> RemoteError {
    RemoteError::AccessDenied {
        realm: challenge.realm.clone(),
        service: challenge.service.clone(),
        scope: challenge.scope.clone(),
        reason,
    }
}

fn decode_status(program: &Path, verb: &str, output: &str) -> Result<AccessStatus> {
    serde_json::from_str(output).map_err(|e| RemoteError::Helper {
        command: format!("{} {verb}", program.display()),
        message: format!("invalid access status: {e}"),
    })
}

/// Runs `program args...` and returns its trimmed stdout. With
/// `anonymous_ok`, a failing run that printed `Anonymous` still counts.
async fn run(program: &Path, args: &[&str], anonymous_ok: bool) -> Result<String> {
    let command = format!("{} {}", program.display(), args.first().copied().unwrap_or_default());
    debug!(command = %command, "Running access helper");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| RemoteError::Helper {
            command: command.clone(),
            message: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() || (anonymous_ok && stdout == ANONYMOUS) {
        return Ok(stdout);
    }

    Err(RemoteError::Helper {
        command,
        message: format!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}
