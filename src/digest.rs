//! SHA-256 content digests in the `sha256:<lowercase hex>` form.

use crate::error::AttestationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// A validated `sha256:<hex>` digest. Only constructible from content or from
/// a string that parses as exactly that shape.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub const PREFIX: &'static str = "sha256:";

    /// Digest of `bytes`. Pure; no special-casing by size.
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(Sha256::digest(bytes))))
    }

    /// Parses `sha256:` followed by 64 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, AttestationError> {
        let hex_part = s.strip_prefix(Self::PREFIX).ok_or_else(|| {
            AttestationError::format(format!("digest must start with {:?}", Self::PREFIX))
        })?;
        Self::from_hex(hex_part)
    }

    /// Wraps a bare lowercase hex SHA-256 value, e.g. from a `digest.sha256`
    /// map entry.
    pub fn from_hex(hex_part: &str) -> Result<Self, AttestationError> {
        let well_formed = hex_part.len() == SHA256_HEX_LEN
            && hex_part
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(AttestationError::format(
                "digest must be 64 lowercase hex characters",
            ));
        }
        Ok(Self(format!("{}{hex_part}", Self::PREFIX)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.strip_prefix(Self::PREFIX).unwrap_or(&self.0)
    }
}

/// Convenience for [`Digest::of`].
pub fn digest(bytes: &[u8]) -> Digest {
    Digest::of(bytes)
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = AttestationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}
