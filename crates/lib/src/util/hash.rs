//! Fingerprint hashing.
//!
//! Fingerprints are produced upstream by the snapshotting layer and only
//! compared here. `Fingerprint::of` hashes raw bytes for callers and tests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An opaque, comparable digest of captured input or output state.
///
/// # Format
///
/// Any string is accepted. Digests produced by [`Fingerprint::of`] are
/// lowercase hexadecimal SHA-256 (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  /// Hash arbitrary bytes into a fingerprint.
  pub fn of(data: &[u8]) -> Self {
    Fingerprint(hex::encode(Sha256::digest(data)))
  }

  /// Hash the JSON serialization of a value.
  pub fn of_serialized<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
    let serialized = serde_json::to_string(value)?;
    Ok(Self::of(serialized.as_bytes()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for Fingerprint {
  fn from(value: &str) -> Self {
    Fingerprint(value.to_string())
  }
}
