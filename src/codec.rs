//! Text interchange for [`BuildAttestation`] records.
//!
//! Decoding is structural only. Callers that need integrity assurance must
//! pass the decoded record to [`AttestationBuilder::verify`].
//!
//! [`AttestationBuilder::verify`]: crate::attest::AttestationBuilder::verify

use crate::error::AttestationError;
use crate::model::BuildAttestation;
use serde_json::Value;

/// Fields whose absence is reported by name rather than as a generic parse
/// failure.
const REQUIRED_FIELDS: &[&str] = &["id", "predicate"];

/// Pretty-printed JSON. Stable for a given record; every field, including
/// `slsaProvenance`, is preserved.
pub fn encode(attestation: &BuildAttestation) -> Result<String, AttestationError> {
    Ok(serde_json::to_string_pretty(attestation)?)
}

/// Parses `text` into a record. Never coerces: a missing `id` or
/// `predicate`, a malformed id or digest, or any other shape error fails.
pub fn decode(text: &str) -> Result<BuildAttestation, AttestationError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| AttestationError::format(format!("not valid JSON: {e}")))?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<BuildAttestation, AttestationError> {
    let object = value
        .as_object()
        .ok_or_else(|| AttestationError::format("attestation must be a JSON object"))?;
    for field in REQUIRED_FIELDS {
        if object.get(*field).map_or(true, Value::is_null) {
            return Err(AttestationError::format(format!("missing field `{field}`")));
        }
    }
    serde_json::from_value(value).map_err(|e| AttestationError::format(e.to_string()))
}
