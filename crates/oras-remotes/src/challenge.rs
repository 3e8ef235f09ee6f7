//! `WWW-Authenticate: Bearer ...` challenge parsing.
//!
//! Examples of what registries send:
//!
//! ```text
//! Bearer realm="https://example.azurecr.io/oauth2/token",service="example.azurecr.io"
//! Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:samalba/my-app:pull,push"
//! ```

use crate::error::{RemoteError, Result};
use std::collections::HashMap;

/// A parsed bearer challenge. Built per failed request, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Token endpoint.
    pub realm: String,
    /// Service the token is for (usually the registry host).
    pub service: String,
    /// Requested scope, empty when the registry did not send one.
    pub scope: String,
    /// Repository namespace taken from a `repository:<ns>:<actions>` scope.
    pub namespace: String,
}

impl AuthChallenge {
    /// Parses the (possibly concatenated) `WWW-Authenticate` header values.
    ///
    /// # Examples
    ///
    /// ```
    /// use oras_remotes::AuthChallenge;
    ///
    /// let challenge = AuthChallenge::parse(
    ///     r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:samalba/my-app:pull,push""#,
    /// ).unwrap();
    /// assert_eq!(challenge.realm, "https://auth.docker.io/token");
    /// assert_eq!(challenge.scope, "repository:samalba/my-app:pull,push");
    /// assert_eq!(challenge.namespace, "samalba/my-app");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidChallenge`] if the header is not a
    /// bearer challenge with a realm.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = || RemoteError::InvalidChallenge {
            header: header.to_string(),
        };

        let mut rest = header.trim();
        if let Some(prefix) = rest.get(..17) {
            if prefix.eq_ignore_ascii_case("www-authenticate:") {
                rest = rest[17..].trim_start();
            }
        }

        let (scheme, params) = rest.split_once(char::is_whitespace).ok_or_else(invalid)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(invalid());
        }

        let mut params = parse_params(params);
        let realm = params.remove("realm").filter(|r| !r.is_empty()).ok_or_else(invalid)?;
        let service = params.remove("service").unwrap_or_default();
        let scope = params.remove("scope").unwrap_or_default();
        let namespace = namespace_from_scope(&scope).unwrap_or_default().to_string();

        Ok(Self {
            realm,
            service,
            scope,
            namespace,
        })
    }
}

/// Splits `key="value",key=value` pairs, honouring commas inside quotes.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}

        let key: String =
            std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ',')).collect();
        if key.is_empty() {
            break;
        }
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }

        let value: String = if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => value.extend(chars.next()),
                    _ => value.push(c),
                }
            }
            value
        } else {
            std::iter::from_fn(|| chars.next_if(|c| *c != ',')).collect()
        };

        // First occurrence wins when several challenges were concatenated.
        params
            .entry(key.trim().to_ascii_lowercase())
            .or_insert_with(|| value.trim().to_string());
    }

    params
}

/// `repository:<namespace>:<actions>` -> `<namespace>`
fn namespace_from_scope(scope: &str) -> Option<&str> {
    let rest = scope.strip_prefix("repository:")?;
    let (namespace, _actions) = rest.rsplit_once(':')?;
    Some(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_scope() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://example.azurecr.io/oauth2/token",service="example.azurecr.io""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://example.azurecr.io/oauth2/token");
        assert_eq!(challenge.service, "example.azurecr.io");
        assert!(challenge.scope.is_empty());
        assert!(challenge.namespace.is_empty());
    }

    #[test]
    fn test_parse_with_scope() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://example.azurecr.io/oauth2/token",service="example.azurecr.io",scope="repository:ubuntu:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.scope, "repository:ubuntu:pull");
        assert_eq!(challenge.namespace, "ubuntu");
    }

    #[test]
    fn test_parse_tolerates_header_name_and_spacing() {
        let challenge = AuthChallenge::parse(
            r#"Www-Authenticate: bearer realm="https://auth.example.com/token", service=registry.example.com"#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service, "registry.example.com");
    }

    #[test]
    fn test_parse_rejects_non_bearer() {
        assert!(AuthChallenge::parse(r#"Basic realm="registry""#).is_err());
        assert!(AuthChallenge::parse(r#"Bearer service="registry.example.com""#).is_err());
        assert!(AuthChallenge::parse("").is_err());
    }

    #[test]
    fn test_namespace_from_scope() {
        assert_eq!(
            namespace_from_scope("repository:library/app:pull,push"),
            Some("library/app")
        );
        assert_eq!(namespace_from_scope("registry:catalog:*"), None);
    }
}
