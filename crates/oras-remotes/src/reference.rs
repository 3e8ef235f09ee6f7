//! Reference parsing.
//!
//! A reference has the shape `host/namespace:tag` or `host/namespace@digest`.
//! The namespace may contain `/`, the locator may not. Parsing is purely
//! syntactic and never touches the network.
//!
//! Grammar:
//! - namespace component: `[a-z0-9]+([._-][a-z0-9]+)*`, joined by `/`
//! - tag: `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`
//! - digest: `algorithm:encoded` (see [`Digest`])

use crate::digest::Digest;
use crate::error::{RemoteError, Result};
use std::fmt;
use std::str::FromStr;

const MAX_TAG_LEN: usize = 128;

/// The trailing component of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// A mutable tag such as `v1`.
    Tag(String),
    /// An immutable content digest.
    Digest(Digest),
}

impl Locator {
    /// Returns the locator as it appears in a URL path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(tag) => tag,
            Self::Digest(digest) => digest.as_str(),
        }
    }

    /// Returns the digest if this locator is one.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        match self {
            Self::Tag(_) => None,
            Self::Digest(digest) => Some(digest),
        }
    }

    const fn separator(&self) -> char {
        match self {
            Self::Tag(_) => ':',
            Self::Digest(_) => '@',
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `host/namespace[:tag|@digest]` reference. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    host: String,
    namespace: String,
    locator: Locator,
}

impl Reference {
    /// Parses a textual reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use oras_remotes::Reference;
    ///
    /// let reference = Reference::parse("registry.example.com/library/app:v1").unwrap();
    /// assert_eq!(reference.host(), "registry.example.com");
    /// assert_eq!(reference.namespace(), "library/app");
    /// assert_eq!(reference.locator().as_str(), "v1");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MalformedReference`] if the text does not match
    /// the grammar.
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |reason: &str| RemoteError::MalformedReference {
            reference: text.to_string(),
            reason: reason.to_string(),
        };

        let (repository, locator) =
            split_locator(text).ok_or_else(|| malformed("missing tag or digest"))?;

        let locator = match locator {
            RawLocator::Digest(digest) => Locator::Digest(
                Digest::parse(digest).map_err(|_| malformed("invalid digest"))?,
            ),
            RawLocator::Tag(tag) => {
                if !valid_tag(tag) {
                    return Err(malformed("invalid tag"));
                }
                Locator::Tag(tag.to_string())
            }
        };

        let (host, namespace) = repository
            .split_once('/')
            .ok_or_else(|| malformed("missing namespace"))?;

        if !valid_host(host) {
            return Err(malformed("invalid host"));
        }
        if !valid_namespace(namespace) {
            return Err(malformed("invalid namespace"));
        }

        Ok(Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            locator,
        })
    }

    /// Builds a reference from parts that were validated elsewhere.
    pub(crate) fn from_parts(host: &str, namespace: &str, locator: Locator) -> Self {
        Self {
            host: host.to_string(),
            namespace: namespace.to_string(),
            locator,
        }
    }

    /// Registry host, including the port if one was given.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository namespace (may contain `/`).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tag or digest.
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}{}",
            self.host,
            self.namespace,
            self.locator.separator(),
            self.locator
        )
    }
}

impl FromStr for Reference {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Extracts and re-validates only the trailing locator of a reference.
///
/// # Examples
///
/// ```
/// use oras_remotes::validate_reference;
///
/// assert_eq!(validate_reference("ghcr.io/oras/registry:v0.0.3").unwrap(), "v0.0.3");
/// assert!(validate_reference("ghcr.io/oras/registry").is_err());
/// ```
///
/// # Errors
///
/// Returns [`RemoteError::MalformedReference`] if there is no locator or it
/// does not validate.
pub fn validate_reference(text: &str) -> Result<String> {
    let malformed = |reason: &str| RemoteError::MalformedReference {
        reference: text.to_string(),
        reason: reason.to_string(),
    };

    match split_locator(text) {
        Some((_, RawLocator::Tag(tag))) if valid_tag(tag) => Ok(tag.to_string()),
        Some((_, RawLocator::Digest(digest))) if Digest::parse(digest).is_ok() => {
            Ok(digest.to_string())
        }
        Some(_) => Err(malformed("invalid locator")),
        None => Err(malformed(
            "a reference should be in the form of {host}/{namespace}:{tag}",
        )),
    }
}

enum RawLocator<'a> {
    Tag(&'a str),
    Digest(&'a str),
}

fn split_locator(text: &str) -> Option<(&str, RawLocator<'_>)> {
    if let Some((repository, digest)) = text.rsplit_once('@') {
        return Some((repository, RawLocator::Digest(digest)));
    }

    // The tag separator is the last ':' after the last '/', so a host port
    // is never mistaken for a tag.
    let last_slash = text.rfind('/')?;
    let colon = text[last_slash..].rfind(':')? + last_slash;
    Some((&text[..colon], RawLocator::Tag(&text[colon + 1..])))
}

fn valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn valid_host(host: &str) -> bool {
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };

    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));

    name_ok && port_ok
}

fn valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && namespace.split('/').all(valid_component)
}

/// `[a-z0-9]+([._-][a-z0-9]+)*`
fn valid_component(component: &str) -> bool {
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let mut previous_separator = true;

    for b in component.bytes() {
        if alnum(b) {
            previous_separator = false;
        } else if matches!(b, b'.' | b'_' | b'-') && !previous_separator {
            previous_separator = true;
        } else {
            return false;
        }
    }

    !previous_separator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(text: &str) -> (String, String, String) {
        let reference = Reference::parse(text).unwrap();
        (
            reference.host().to_string(),
            reference.namespace().to_string(),
            reference.locator().to_string(),
        )
    }

    #[test]
    fn test_parse_tagged_references() {
        assert_eq!(
            parts("registry.example.com/library/app:v1"),
            (
                "registry.example.com".to_string(),
                "library/app".to_string(),
                "v1".to_string()
            )
        );
        assert_eq!(
            parts("localhost:5000/oras:v1"),
            ("localhost:5000".to_string(), "oras".to_string(), "v1".to_string())
        );
        assert_eq!(
            parts("registry-1.docker.io/library/ubuntu:latest").1,
            "library/ubuntu"
        );
        assert_eq!(
            parts("ghcr.io/oras-project/registry:v0.0.3-alpha").2,
            "v0.0.3-alpha"
        );
    }

    #[test]
    fn test_parse_digest_reference() {
        let digest = format!(
            "sha256:{}",
            "4942a1abcbfa1c325b1d7ed93d3cf6020f555be706672308a4a4a6b6d631d2e7"
        );
        let reference =
            Reference::parse(&format!("ghcr.io/oras-project/registry@{digest}")).unwrap();
        assert_eq!(reference.namespace(), "oras-project/registry");
        assert_eq!(reference.locator().digest().map(Digest::as_str), Some(digest.as_str()));
        assert_eq!(reference.to_string(), format!("ghcr.io/oras-project/registry@{digest}"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "registry.example.com/library/app",
            "localhost:5000",
            "registry.example.com:v1",
            "registry.example.com/Library/app:v1",
            "registry.example.com/library//app:v1",
            "registry.example.com/library/app:",
            "registry.example.com/library/app:-v1",
            "registry.example.com/library/app@sha256:short",
            "/library/app:v1",
            "host:port/app:v1",
        ] {
            let err = Reference::parse(bad).unwrap_err();
            assert!(
                matches!(err, RemoteError::MalformedReference { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_tag_length_limit() {
        let ok = format!("host/ns:{}", "a".repeat(128));
        let too_long = format!("host/ns:{}", "a".repeat(129));
        assert!(Reference::parse(&ok).is_ok());
        assert!(Reference::parse(&too_long).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert_eq!(validate_reference("localhost:5000/oras:v1").unwrap(), "v1");
        let digest = format!("sha256:{}", "b".repeat(64));
        assert_eq!(
            validate_reference(&format!("localhost:5000/oras@{digest}")).unwrap(),
            digest
        );
        assert!(validate_reference("localhost:5000/oras").is_err());
        assert!(validate_reference("localhost:5000/oras:bad!tag").is_err());
    }
}
