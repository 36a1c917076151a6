//! Duplicate-detection keys for remote files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic key identifying a remote file's content.
///
/// When the provider reports a content checksum the key is derived from the
/// checksum and size, so identical content under different ids collapses to
/// one entry. Otherwise it falls back to remote id, size and modification
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn derive(
        id: &str,
        size: u64,
        modified_time: Option<&DateTime<Utc>>,
        content_hash: Option<&str>,
    ) -> Self {
        let key = match content_hash {
            Some(hash) if !hash.is_empty() => format!("content:{}:{}", hash, size),
            _ => format!(
                "meta:{}:{}:{}",
                id,
                size,
                modified_time.map(|t| t.to_rfc3339()).unwrap_or_default()
            ),
        };

        let digest = Sha256::digest(key.as_bytes());
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_content_hash_wins_over_identity() {
        let a = Fingerprint::derive("file-a", 10, Some(&at(1)), Some("abc"));
        let b = Fingerprint::derive("file-b", 10, Some(&at(2)), Some("abc"));
        assert_eq!(a, b);

        let resized = Fingerprint::derive("file-a", 11, Some(&at(1)), Some("abc"));
        assert_ne!(a, resized);
    }

    #[test]
    fn test_metadata_fallback() {
        let a = Fingerprint::derive("file-a", 10, Some(&at(1)), None);
        let touched = Fingerprint::derive("file-a", 10, Some(&at(2)), None);
        let other = Fingerprint::derive("file-b", 10, Some(&at(1)), None);

        assert_ne!(a, touched);
        assert_ne!(a, other);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_empty_hash_uses_fallback() {
        let empty = Fingerprint::derive("file-a", 10, None, Some(""));
        let none = Fingerprint::derive("file-a", 10, None, None);
        assert_eq!(empty, none);
    }

    proptest! {
        #[test]
        fn prop_derivation_is_deterministic(
            id in "[A-Za-z0-9_-]{10,40}",
            size in any::<u64>(),
            secs in 0i64..4_000_000_000,
            hash in proptest::option::of("[0-9a-f]{32}"),
        ) {
            let time = at(secs);
            let first = Fingerprint::derive(&id, size, Some(&time), hash.as_deref());
            let second = Fingerprint::derive(&id, size, Some(&time), hash.as_deref());
            prop_assert_eq!(first, second);
        }
    }
}
