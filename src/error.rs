//! Error types for path confinement and attestation handling.
//!
//! Messages are written for operators and never embed the resolved absolute
//! location of a sandboxed file: a [`PathError`] only echoes the candidate the
//! caller supplied, Debug-escaped so NUL and control bytes stay printable.

use thiserror::Error;

/// Failure to turn an untrusted candidate into a sandbox-confined path.
#[derive(Debug, Error)]
pub enum PathError {
    /// Malformed input, traversal, or an escape from the sandbox root after
    /// canonicalization. Always fail-closed.
    #[error("invalid path {candidate:?}: {reason}")]
    Invalid {
        /// The candidate exactly as supplied.
        candidate: String,
        /// Human-readable reason.
        reason: &'static str,
    },

    /// The candidate is syntactically valid and inside the sandbox but does
    /// not currently exist.
    #[error("path not found: {0:?}")]
    NotFound(String),

    /// Canonicalization failed for a reason other than "not found".
    #[error("cannot resolve {candidate:?}: {source}")]
    Io {
        /// The candidate exactly as supplied.
        candidate: String,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}

impl PathError {
    pub(crate) fn invalid(candidate: &str, reason: &'static str) -> Self {
        Self::Invalid {
            candidate: candidate.to_string(),
            reason,
        }
    }

    /// True for [`PathError::NotFound`]; lets callers offer "create it" flows
    /// without conflating a missing file with a security violation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors produced while creating, encoding, or decoding attestations.
#[derive(Debug, Error)]
pub enum AttestationError {
    #[error(transparent)]
    Path(#[from] PathError),

    /// Only regular files can be attested.
    #[error("subject is not a regular file: {0:?}")]
    NotAFile(String),

    #[error("subject too large: {candidate:?} ({size} bytes, max {max} bytes)")]
    TooLarge {
        candidate: String,
        size: u64,
        max: u64,
    },

    #[error("failed to read subject {candidate:?}: {source}")]
    Read {
        candidate: String,
        #[source]
        source: std::io::Error,
    },

    /// Structural failure while decoding, or a malformed identifier/digest.
    #[error("attestation format error: {0}")]
    Format(String),

    #[error("attestation serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),

    #[error("provenance generation failed: {0}")]
    Provenance(String),
}

impl AttestationError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}
