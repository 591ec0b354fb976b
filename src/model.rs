//! Attestation records and the value types they are built from.
//!
//! Field names serialize in camelCase; optional and empty collections are
//! omitted, and decode back to the same value.

use crate::digest::Digest;
use crate::error::AttestationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::{collections::BTreeMap, fmt, path::Path};
use time::OffsetDateTime;

/// Correlation id of the form `att_<epoch-millis>_<8 lowercase hex>`.
///
/// The suffix is a truncated SHA-256 over the millisecond timestamp and the
/// resolved subject path. Not a security token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttestationId(String);

impl AttestationId {
    const PREFIX: &'static str = "att_";
    const SUFFIX_LEN: usize = 8;

    pub fn generate(epoch_millis: u64, resolved_path: &Path) -> Self {
        let millis = epoch_millis.to_string();
        let mut h = Sha256::new();
        h.update(millis.as_bytes());
        h.update(resolved_path.as_os_str().as_encoded_bytes());
        let mut suffix = hex::encode(h.finalize());
        suffix.truncate(Self::SUFFIX_LEN);
        Self(format!("{}{millis}_{suffix}", Self::PREFIX))
    }

    pub fn parse(s: &str) -> Result<Self, AttestationError> {
        let malformed = || {
            AttestationError::format(format!(
                "attestation id {s:?} is not of the form att_<millis>_<8 hex>"
            ))
        };
        let (millis, suffix) = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(malformed)?;
        let millis_ok = !millis.is_empty() && millis.bytes().all(|b| b.is_ascii_digit());
        let suffix_ok = suffix.len() == Self::SUFFIX_LEN
            && suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !(millis_ok && suffix_ok) {
            return Err(malformed());
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The embedded creation time in milliseconds since the Unix epoch.
    pub fn epoch_millis(&self) -> Option<u64> {
        self.0
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.split_once('_'))
            .and_then(|(millis, _)| millis.parse().ok())
    }
}

impl fmt::Display for AttestationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AttestationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestationId({})", self.0)
    }
}

impl TryFrom<String> for AttestationId {
    type Error = AttestationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttestationId> for String {
    fn from(value: AttestationId) -> Self {
        value.0
    }
}

/// An input consumed by the build ([`Material`]) or by the builder itself
/// ([`Dependency`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    /// Algorithm name to hex value, e.g. `{"sha256": "..."}`.
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub type Material = ResourceDescriptor;
pub type Dependency = ResourceDescriptor;

impl ResourceDescriptor {
    pub fn new(uri: impl Into<String>, digest: &Digest) -> Self {
        Self {
            uri: uri.into(),
            digest: BTreeMap::from([("sha256".to_string(), digest.hex().to_string())]),
            name: None,
            version: None,
        }
    }
}

/// Identity of the system that produced the artifact. Supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderInfo {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builder_dependencies: Vec<Dependency>,
}

impl BuilderInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            builder_dependencies: Vec::new(),
        }
    }
}

/// How the build was invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeInfo {
    #[serde(rename = "type")]
    pub recipe_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defined_in_material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, Value>,
}

impl RecipeInfo {
    pub fn new(recipe_type: impl Into<String>) -> Self {
        Self {
            recipe_type: recipe_type.into(),
            defined_in_material: None,
            entry_point: None,
            arguments: BTreeMap::new(),
            environment: BTreeMap::new(),
        }
    }
}

/// Which parts of the invocation the record claims to capture fully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completeness {
    pub parameters: bool,
    pub environment: bool,
    pub materials: bool,
}

impl Default for Completeness {
    fn default() -> Self {
        Self {
            parameters: true,
            environment: true,
            materials: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataInfo {
    #[serde(with = "time::serde::rfc3339")]
    pub build_started_on: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub build_finished_on: OffsetDateTime,
    pub completeness: Completeness,
    pub reproducible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_invocation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Copied from the provenance document's `predicateType`.
    #[serde(rename = "type")]
    pub predicate_type: String,
    pub builder: BuilderInfo,
    pub recipe: RecipeInfo,
    pub metadata: MetadataInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSubject {
    /// Path relative to the reference root, or the resolved path when the
    /// subject lies outside it.
    pub name: String,
    pub digest: Digest,
    /// Sandbox-relative path, re-resolved on verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A point-in-time claim that `subject` was produced by `predicate.builder`.
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAttestation {
    pub id: AttestationId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub subject: AttestationSubject,
    pub predicate: Predicate,
    /// Opaque pass-through; signing happens elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slsa_provenance: Option<Value>,
}
