//! Content digests (`algorithm:encoded`).

use crate::error::{RemoteError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// A validated content digest such as `sha256:4942a1ab...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Parses and validates a digest string.
    ///
    /// `sha256` requires 64 lowercase hex characters and `sha512` requires
    /// 128. Other algorithms only need a well-formed encoded part.
    ///
    /// # Examples
    ///
    /// ```
    /// use oras_remotes::Digest;
    ///
    /// let hex = "a".repeat(64);
    /// let digest = Digest::parse(&format!("sha256:{hex}")).unwrap();
    /// assert_eq!(digest.algorithm(), "sha256");
    /// assert!(Digest::parse("sha256:xyz").is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidDigest`] if the string does not validate.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || RemoteError::InvalidDigest {
            digest: input.to_string(),
        };

        let (algorithm, encoded) = input.split_once(':').ok_or_else(invalid)?;
        if !valid_algorithm(algorithm) || encoded.is_empty() {
            return Err(invalid());
        }

        let expected_len = match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        };

        match expected_len {
            Some(len) => {
                let lower_hex = encoded
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
                if encoded.len() != len || !lower_hex {
                    return Err(invalid());
                }
            }
            None => {
                let ok = encoded
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'));
                if !ok {
                    return Err(invalid());
                }
            }
        }

        Ok(Self(input.to_string()))
    }

    /// Computes the sha256 digest of `data`.
    #[must_use]
    pub fn sha256_of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Returns the algorithm part (e.g. `sha256`).
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(a, _)| a)
    }

    /// Returns the encoded part, without the algorithm prefix.
    #[must_use]
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, e)| e)
    }

    /// Returns the full digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `[a-z0-9]+([+._-][a-z0-9]+)*`
fn valid_algorithm(algorithm: &str) -> bool {
    !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| {
                !part.is_empty()
                    && part
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            })
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of() {
        let digest = Digest::sha256_of(b"test data");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded().len(), 64);
        assert!(Digest::parse(digest.as_str()).is_ok());
    }

    #[test]
    fn test_rejects_bad_digests() {
        for bad in [
            "",
            "sha256",
            "sha256:",
            "sha256:abc",
            &format!("sha256:{}", "A".repeat(64)),
            &format!("SHA256:{}", "a".repeat(64)),
            &format!("sha512:{}", "a".repeat(64)),
            "md5:has space",
        ] {
            assert!(Digest::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_accepts_other_algorithms() {
        let digest =
            Digest::parse("multihash+base58:QmRZxt2b1FVZPNqd8hsiykDL3TdBDeTSPX9Kv46HmX4Gx8")
                .unwrap();
        assert_eq!(digest.algorithm(), "multihash+base58");
    }

    #[test]
    fn test_serde_validates() {
        let ok = format!("\"sha256:{}\"", "0".repeat(64));
        assert!(serde_json::from_str::<Digest>(&ok).is_ok());
        assert!(serde_json::from_str::<Digest>("\"sha256:nope\"").is_err());
    }
}
