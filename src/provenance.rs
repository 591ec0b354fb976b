//! Provenance document generation.
//!
//! [`ProvenanceAdapter`] is the seam a full standards-compliant generator
//! plugs into. The attestation builder only reads `predicateType` from the
//! returned document; the rest is carried opaquely as `slsaProvenance`.

use crate::digest::Digest;
use crate::error::AttestationError;
use crate::model::{BuilderInfo, Material, MetadataInfo, RecipeInfo};
use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;

pub const IN_TOTO_STATEMENT_V1: &str = "https://in-toto.io/Statement/v1";
pub const SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

/// A named artifact and its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub digest: Digest,
}

/// Everything about the build that goes into a provenance document.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildMetadata {
    pub builder: BuilderInfo,
    pub recipe: RecipeInfo,
    pub metadata: MetadataInfo,
    pub materials: Vec<Material>,
}

/// A generated provenance document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceDocument(pub Value);

impl ProvenanceDocument {
    pub fn predicate_type(&self) -> Option<&str> {
        self.0.get("predicateType").and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

pub trait ProvenanceAdapter: Send + Sync {
    /// Must digest with SHA-256, bit-for-bit equal to [`Digest::of`].
    fn create_subject_from_content(&self, name: &str, content: &[u8]) -> Subject {
        Subject {
            name: name.to_string(),
            digest: Digest::of(content),
        }
    }

    fn create_provenance(
        &self,
        subjects: &[Subject],
        metadata: &BuildMetadata,
    ) -> Result<ProvenanceDocument, AttestationError>;
}

/// Emits an in-toto Statement v1 carrying a SLSA v1 provenance predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlsaV1Adapter;

impl ProvenanceAdapter for SlsaV1Adapter {
    fn create_provenance(
        &self,
        subjects: &[Subject],
        metadata: &BuildMetadata,
    ) -> Result<ProvenanceDocument, AttestationError> {
        if subjects.is_empty() {
            return Err(AttestationError::Provenance(
                "at least one subject is required".to_string(),
            ));
        }

        let subject: Vec<Value> = subjects
            .iter()
            .map(|s| json!({ "name": s.name, "digest": { "sha256": s.digest.hex() } }))
            .collect();

        let recipe = &metadata.recipe;
        let mut external = Map::new();
        if let Some(entry_point) = &recipe.entry_point {
            external.insert("entryPoint".into(), json!(entry_point));
        }
        if let Some(source) = &recipe.defined_in_material {
            external.insert("source".into(), json!(source));
        }
        if !recipe.arguments.is_empty() {
            external.insert("arguments".into(), json!(recipe.arguments));
        }

        let mut internal = Map::new();
        if !recipe.environment.is_empty() {
            internal.insert("environment".into(), json!(recipe.environment));
        }
        let info = &metadata.metadata;
        internal.insert("completeness".into(), json!(info.completeness));
        internal.insert("reproducible".into(), json!(info.reproducible));

        let mut builder = json!({
            "id": metadata.builder.id,
            "version": { "builder": metadata.builder.version },
        });
        if !metadata.builder.builder_dependencies.is_empty() {
            builder["builderDependencies"] = json!(metadata.builder.builder_dependencies);
        }

        let mut run_metadata = json!({
            "startedOn": info.build_started_on.format(&Rfc3339)?,
            "finishedOn": info.build_finished_on.format(&Rfc3339)?,
        });
        if let Some(invocation_id) = &info.build_invocation_id {
            run_metadata["invocationId"] = json!(invocation_id);
        }

        Ok(ProvenanceDocument(json!({
            "_type": IN_TOTO_STATEMENT_V1,
            "subject": subject,
            "predicateType": SLSA_PROVENANCE_V1,
            "predicate": {
                "buildDefinition": {
                    "buildType": recipe.recipe_type,
                    "externalParameters": external,
                    "internalParameters": internal,
                    "resolvedDependencies": metadata.materials,
                },
                "runDetails": {
                    "builder": builder,
                    "metadata": run_metadata,
                }
            }
        })))
    }
}
