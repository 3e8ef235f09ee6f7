//! Property-based tests for reference, digest and challenge parsing.

use crate::challenge::AuthChallenge;
use crate::digest::Digest;
use crate::error::RemoteError;
use crate::reference::{validate_reference, Locator, Reference};
use proptest::prelude::*;

/// Strategy for generating registry hosts, with an optional port.
fn host_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}(\\.[a-z][a-z0-9]{0,8}){0,2}(:[0-9]{2,5})?"
}

/// Strategy for generating a single namespace component.
fn component_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,8}([._-][a-z0-9]{1,8}){0,2}"
}

/// Strategy for generating namespaces of one to three components.
fn namespace_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(component_strategy(), 1..=3).prop_map(|parts| parts.join("/"))
}

/// Strategy for generating tags.
fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9._-]{0,40}"
}

/// Strategy for generating sha256 digests.
fn digest_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{64}".prop_map(|hex| format!("sha256:{hex}"))
}

proptest! {
    /// Test that a tagged reference survives parse and display.
    #[test]
    fn tagged_reference_roundtrip(
        host in host_strategy(),
        namespace in namespace_strategy(),
        tag in tag_strategy(),
    ) {
        let text = format!("{host}/{namespace}:{tag}");
        let reference = Reference::parse(&text).unwrap();
        prop_assert_eq!(reference.host(), host.as_str());
        prop_assert_eq!(reference.namespace(), namespace.as_str());
        prop_assert_eq!(reference.locator(), &Locator::Tag(tag));
        prop_assert_eq!(reference.to_string(), text);
    }

    /// Test that a digest reference survives parse and display.
    #[test]
    fn digest_reference_roundtrip(
        host in host_strategy(),
        namespace in namespace_strategy(),
        digest in digest_strategy(),
    ) {
        let text = format!("{host}/{namespace}@{digest}");
        let reference = Reference::parse(&text).unwrap();
        prop_assert_eq!(reference.locator().digest().map(Digest::as_str), Some(digest.as_str()));
        prop_assert_eq!(reference.to_string(), text);
    }

    /// Test that a reference without a locator is always rejected.
    #[test]
    fn reference_without_locator_rejected(
        host in host_strategy(),
        namespace in namespace_strategy(),
    ) {
        let text = format!("{host}/{namespace}");
        let is_malformed = matches!(
            Reference::parse(&text),
            Err(RemoteError::MalformedReference { .. })
        );
        prop_assert!(is_malformed);
        prop_assert!(validate_reference(&text).is_err());
    }

    /// Test that validate_reference returns exactly the parsed locator.
    #[test]
    fn validate_reference_matches_locator(
        host in host_strategy(),
        namespace in namespace_strategy(),
        tag in tag_strategy(),
    ) {
        let text = format!("{host}/{namespace}:{tag}");
        let reference = Reference::parse(&text).unwrap();
        prop_assert_eq!(validate_reference(&text).unwrap(), reference.locator().as_str());
    }

    /// Test that uppercase namespaces are rejected.
    #[test]
    fn uppercase_namespace_rejected(
        host in host_strategy(),
        namespace in "[A-Z]{1,8}",
        tag in tag_strategy(),
    ) {
        let text = format!("{host}/{namespace}:{tag}");
        prop_assert!(Reference::parse(&text).is_err());
    }

    /// Test that computed digests always validate.
    #[test]
    fn computed_digest_parses(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let digest = Digest::sha256_of(&data);
        let parsed = Digest::parse(digest.as_str()).unwrap();
        prop_assert_eq!(parsed.algorithm(), "sha256");
        prop_assert_eq!(parsed.encoded().len(), 64);
        prop_assert_eq!(parsed, digest);
    }

    /// Test that the challenge namespace is taken from the repository scope.
    #[test]
    fn challenge_namespace_from_scope(
        namespace in namespace_strategy(),
        service in "[a-z][a-z0-9.]{0,16}",
    ) {
        let header = format!(
            "Bearer realm=\"https://auth.example.com/token\",service=\"{service}\",scope=\"repository:{namespace}:pull,push\""
        );
        let challenge = AuthChallenge::parse(&header).unwrap();
        prop_assert_eq!(challenge.realm.as_str(), "https://auth.example.com/token");
        prop_assert_eq!(challenge.service, service);
        prop_assert_eq!(challenge.namespace, namespace);
    }
}
