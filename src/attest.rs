//! Attestation creation and verification.
//!
//! Within one [`AttestationBuilder::create_attestation`] call the order is
//! fixed: resolve, read, digest, then generate provenance, so the recorded
//! digest always describes the exact bytes read. Nothing is shared between
//! calls; any number may run concurrently.

use crate::config::GuardConfig;
use crate::digest::Digest;
use crate::error::AttestationError;
use crate::fs_guard::{self, PathGuard, ResolvedPath};
use crate::model::{
    AttestationId, AttestationSubject, BuildAttestation, BuilderInfo, Completeness, Material,
    MetadataInfo, Predicate, RecipeInfo,
};
use crate::provenance::{BuildMetadata, ProvenanceAdapter, SlsaV1Adapter};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Recipe type recorded when the caller supplies none.
pub const DEFAULT_RECIPE_TYPE: &str = "https://safeattest.dev/recipe/file/v1";

/// Caller-supplied values for the predicate. Anything left `None` is
/// defaulted: timestamps to now, invocation id to a fresh UUID, completeness
/// to all-true, and `reproducible` to false.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    pub recipe: Option<RecipeInfo>,
    pub build_started_on: Option<OffsetDateTime>,
    pub build_finished_on: Option<OffsetDateTime>,
    pub completeness: Option<Completeness>,
    pub reproducible: Option<bool>,
    pub build_invocation_id: Option<String>,
    pub materials: Vec<Material>,
    pub signature: Option<String>,
}

/// Why [`AttestationBuilder::verify`] answered the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The subject was re-read and its digest matches.
    Verified,
    /// No `subject.path` was recorded, so only the structure was checked.
    StructuralOnly,
    Malformed(&'static str),
    DigestMismatch,
    /// The subject could not be re-read (invalid, missing, I/O error).
    Unverifiable(String),
}

impl VerificationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Verified | Self::StructuralOnly)
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "verified: subject digest matches"),
            Self::StructuralOnly => {
                write!(f, "structure only: no subject path recorded, digest not rechecked")
            }
            Self::Malformed(reason) => write!(f, "malformed attestation: {reason}"),
            Self::DigestMismatch => write!(f, "subject digest does not match"),
            Self::Unverifiable(reason) => write!(f, "subject could not be re-read: {reason}"),
        }
    }
}

/// Creates and verifies [`BuildAttestation`] records for files inside the
/// sandbox.
#[derive(Debug, Clone)]
pub struct AttestationBuilder<P = SlsaV1Adapter> {
    guard: PathGuard,
    adapter: P,
    reference_root: Option<PathBuf>,
    max_subject_bytes: u64,
}

impl AttestationBuilder<SlsaV1Adapter> {
    pub fn new(config: &GuardConfig) -> Self {
        Self::with_adapter(config, SlsaV1Adapter)
    }
}

impl<P: ProvenanceAdapter> AttestationBuilder<P> {
    /// Subject names are made relative to the current working directory
    /// unless [`with_reference_root`](Self::with_reference_root) says
    /// otherwise.
    pub fn with_adapter(config: &GuardConfig, adapter: P) -> Self {
        Self {
            guard: PathGuard::new(config),
            adapter,
            reference_root: std::env::current_dir().ok().map(canonical_or_given),
            max_subject_bytes: config.max_subject_bytes,
        }
    }

    #[must_use]
    pub fn with_reference_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.reference_root = Some(canonical_or_given(root.into()));
        self
    }

    /// Attests the regular file at `subject_path`.
    ///
    /// # Errors
    ///
    /// Path errors from the guard are propagated unchanged. Directories,
    /// oversized files, read failures and provenance failures are reported
    /// as the matching [`AttestationError`]. No partial record is returned.
    pub async fn create_attestation(
        &self,
        subject_path: &str,
        builder: BuilderInfo,
        overrides: MetadataOverrides,
    ) -> Result<BuildAttestation, AttestationError> {
        let resolved = self.guard.resolve(subject_path).await?;
        let content =
            fs_guard::read_subject(&resolved, subject_path, self.max_subject_bytes).await?;
        let subject = self
            .adapter
            .create_subject_from_content(&self.subject_name(&resolved), &content);

        let now = OffsetDateTime::now_utc();
        let id = AttestationId::generate(epoch_millis(now), resolved.as_path());

        let build = BuildMetadata {
            builder,
            recipe: overrides
                .recipe
                .unwrap_or_else(|| RecipeInfo::new(DEFAULT_RECIPE_TYPE)),
            metadata: MetadataInfo {
                build_started_on: overrides.build_started_on.unwrap_or(now),
                build_finished_on: overrides.build_finished_on.unwrap_or(now),
                completeness: overrides.completeness.unwrap_or_default(),
                reproducible: overrides.reproducible.unwrap_or(false),
                build_invocation_id: Some(
                    overrides
                        .build_invocation_id
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                ),
            },
            materials: overrides.materials,
        };

        let provenance = self
            .adapter
            .create_provenance(std::slice::from_ref(&subject), &build)?;
        let predicate_type = provenance
            .predicate_type()
            .ok_or_else(|| {
                AttestationError::Provenance("document has no predicateType".to_string())
            })?
            .to_string();

        let BuildMetadata {
            builder,
            recipe,
            metadata,
            materials,
        } = build;

        let attestation = BuildAttestation {
            id,
            timestamp: now,
            subject: AttestationSubject {
                name: subject.name,
                digest: subject.digest,
                path: Some(portable_relative(resolved.relative())?),
            },
            predicate: Predicate {
                predicate_type,
                builder,
                recipe,
                metadata,
                materials,
            },
            signature: overrides.signature,
            slsa_provenance: Some(provenance.into_value()),
        };

        info!(
            id = %attestation.id,
            subject = %attestation.subject.name,
            digest = %attestation.subject.digest,
            "attestation created"
        );
        Ok(attestation)
    }

    /// Boolean oracle: true only if the record is well formed and, when it
    /// names a subject path, that file's current digest matches. Never fails.
    pub async fn verify(&self, attestation: &BuildAttestation) -> bool {
        self.verify_outcome(attestation).await.is_accepted()
    }

    pub async fn verify_outcome(&self, attestation: &BuildAttestation) -> VerificationOutcome {
        if let Err(reason) = check_structure(attestation) {
            debug!(id = %attestation.id, reason, "attestation is malformed");
            return VerificationOutcome::Malformed(reason);
        }

        let Some(path) = attestation.subject.path.as_deref() else {
            warn!(
                id = %attestation.id,
                "attestation has no subject path; digest not rechecked"
            );
            return VerificationOutcome::StructuralOnly;
        };

        match self.recompute_digest(path).await {
            Ok(actual) if actual == attestation.subject.digest => VerificationOutcome::Verified,
            Ok(actual) => {
                debug!(
                    id = %attestation.id,
                    expected = %attestation.subject.digest,
                    %actual,
                    "subject digest mismatch"
                );
                VerificationOutcome::DigestMismatch
            }
            Err(error) => {
                debug!(id = %attestation.id, %error, "subject could not be re-read");
                VerificationOutcome::Unverifiable(error.to_string())
            }
        }
    }

    async fn recompute_digest(&self, candidate: &str) -> Result<Digest, AttestationError> {
        let resolved = self.guard.resolve(candidate).await?;
        let content = fs_guard::read_subject(&resolved, candidate, self.max_subject_bytes).await?;
        Ok(Digest::of(&content))
    }

    /// Relative to the reference root so the sandbox layout is not disclosed;
    /// the resolved path itself when the subject lies outside that root.
    fn subject_name(&self, resolved: &ResolvedPath) -> String {
        self.reference_root
            .as_deref()
            .and_then(|root| resolved.as_path().strip_prefix(root).ok())
            .filter(|relative| !relative.as_os_str().is_empty())
            .unwrap_or(resolved.as_path())
            .to_string_lossy()
            .into_owned()
    }
}

fn check_structure(attestation: &BuildAttestation) -> Result<(), &'static str> {
    if attestation.subject.name.is_empty() {
        return Err("subject name is empty");
    }
    if attestation.predicate.predicate_type.is_empty() {
        return Err("predicate type is empty");
    }
    if attestation.predicate.builder.id.is_empty() {
        return Err("builder id is empty");
    }
    if let Some(provenance) = &attestation.slsa_provenance {
        let embedded = provenance.get("predicateType").and_then(|v| v.as_str());
        if embedded != Some(attestation.predicate.predicate_type.as_str()) {
            return Err("provenance predicateType does not match predicate type");
        }
    }
    Ok(())
}

fn epoch_millis(at: OffsetDateTime) -> u64 {
    u64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}

/// `/`-joined form of a sandbox-relative path.
fn portable_relative(path: &Path) -> Result<String, AttestationError> {
    let parts = path
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| AttestationError::format("subject path is not valid UTF-8"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join("/"))
}

fn canonical_or_given(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::error::PathError;
    use crate::provenance::{ProvenanceDocument, Subject};
    use serde_json::json;
    use std::{fs, io::Write, sync::Arc, time::Duration};
    use tempfile::TempDir;

    const HELLO_SHA256: &str =
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn fixture() -> (TempDir, AttestationBuilder) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(root.join("dist").join("app.bin"), b"hello").unwrap();
        let builder = AttestationBuilder::new(&GuardConfig::with_root(&root))
            .with_reference_root(dir.path());
        (dir, builder)
    }

    fn builder_info() -> BuilderInfo {
        BuilderInfo::new("b", "1")
    }

    #[tokio::test]
    async fn test_create_attestation_scenario() {
        let (_dir, builder) = fixture();
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();

        assert_eq!(att.subject.digest.as_str(), HELLO_SHA256);
        assert_eq!(att.subject.name, "sandbox/dist/app.bin");
        assert_eq!(att.subject.path.as_deref(), Some("dist/app.bin"));
        assert!(att.id.as_str().starts_with("att_"));
        assert_eq!(att.id.epoch_millis(), Some(epoch_millis(att.timestamp)));
        assert_eq!(att.predicate.predicate_type, crate::provenance::SLSA_PROVENANCE_V1);
        assert_eq!(att.predicate.builder, builder_info());
        assert_eq!(att.predicate.recipe.recipe_type, DEFAULT_RECIPE_TYPE);
        assert!(att.signature.is_none());

        let provenance = att.slsa_provenance.as_ref().unwrap();
        assert_eq!(provenance["subject"][0]["digest"]["sha256"], att.subject.digest.hex());
    }

    #[tokio::test]
    async fn test_metadata_defaults() {
        let (_dir, builder) = fixture();
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();

        let meta = &att.predicate.metadata;
        assert!(!meta.reproducible, "reproducibility must be opt-in");
        assert_eq!(meta.completeness, Completeness::default());
        assert_eq!(meta.build_started_on, att.timestamp);
        assert_eq!(meta.build_finished_on, att.timestamp);
        let invocation = meta.build_invocation_id.as_deref().unwrap();
        assert!(Uuid::parse_str(invocation).is_ok());
    }

    #[tokio::test]
    async fn test_overrides_are_respected() {
        let (_dir, builder) = fixture();
        let started = OffsetDateTime::UNIX_EPOCH;
        let material = crate::model::ResourceDescriptor::new(
            "git+https://example.com/repo",
            &Digest::of(b"src"),
        );
        let overrides = MetadataOverrides {
            recipe: Some(RecipeInfo::new("https://example.com/recipe/v2")),
            build_started_on: Some(started),
            completeness: Some(Completeness {
                parameters: true,
                environment: false,
                materials: false,
            }),
            reproducible: Some(true),
            build_invocation_id: Some("run-17".into()),
            materials: vec![material.clone()],
            signature: Some("sig-placeholder".into()),
            ..MetadataOverrides::default()
        };

        let att = builder
            .create_attestation("dist/app.bin", builder_info(), overrides)
            .await
            .unwrap();
        let meta = &att.predicate.metadata;
        assert_eq!(meta.build_started_on, started);
        assert!(meta.reproducible);
        assert!(!meta.completeness.environment);
        assert_eq!(meta.build_invocation_id.as_deref(), Some("run-17"));
        assert_eq!(att.predicate.materials, vec![material]);
        assert_eq!(att.predicate.recipe.recipe_type, "https://example.com/recipe/v2");
        assert_eq!(att.signature.as_deref(), Some("sig-placeholder"));
    }

    #[tokio::test]
    async fn test_subject_outside_reference_root_uses_resolved_path() {
        let (dir, builder) = fixture();
        let other = TempDir::new().unwrap();
        let builder = builder.with_reference_root(other.path());
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();

        let expected = fs::canonicalize(dir.path().join("sandbox/dist/app.bin")).unwrap();
        assert_eq!(att.subject.name, expected.to_string_lossy());
        assert!(!att.subject.name.contains(".."));
    }

    #[tokio::test]
    async fn test_directory_subject_rejected() {
        let (_dir, builder) = fixture();
        let err = builder
            .create_attestation("dist", builder_info(), MetadataOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::NotAFile(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_path_errors_propagate() {
        let (_dir, builder) = fixture();
        let err = builder
            .create_attestation("../etc/passwd", builder_info(), MetadataOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::Path(PathError::Invalid { .. })));

        let err = builder
            .create_attestation("dist/missing.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::Path(PathError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oversized_subject_rejected() {
        let (dir, _) = fixture();
        let mut config = GuardConfig::with_root(dir.path().join("sandbox"));
        config.max_subject_bytes = 2;
        let builder = AttestationBuilder::new(&config);
        let err = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::TooLarge { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_verify_unmodified_then_tampered() {
        let (dir, builder) = fixture();
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        assert!(builder.verify(&att).await);
        assert_eq!(builder.verify_outcome(&att).await, VerificationOutcome::Verified);

        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("sandbox/dist/app.bin"))
            .unwrap();
        f.write_all(b"!").unwrap();
        drop(f);

        assert!(!builder.verify(&att).await);
        assert_eq!(
            builder.verify_outcome(&att).await,
            VerificationOutcome::DigestMismatch
        );
    }

    #[tokio::test]
    async fn test_verify_missing_file_is_false() {
        let (dir, builder) = fixture();
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        fs::remove_file(dir.path().join("sandbox/dist/app.bin")).unwrap();

        assert!(!builder.verify(&att).await);
        assert!(matches!(
            builder.verify_outcome(&att).await,
            VerificationOutcome::Unverifiable(_)
        ));
    }

    #[tokio::test]
    async fn test_verify_hostile_path_is_false() {
        let (_dir, builder) = fixture();
        let mut att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        att.subject.path = Some("../../etc/passwd".into());
        assert!(!builder.verify(&att).await);
        att.subject.path = Some("dist/\0app.bin".into());
        assert!(!builder.verify(&att).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fifo_subject_fails_without_blocking() {
        let (dir, builder) = fixture();
        let status = std::process::Command::new("mkfifo")
            .arg(dir.path().join("sandbox/dist/pipe"))
            .status()
            .unwrap();
        assert!(status.success());

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            builder.create_attestation("dist/pipe", builder_info(), MetadataOverrides::default()),
        )
        .await
        .expect("create_attestation blocked on a FIFO")
        .unwrap_err();
        assert!(matches!(err, AttestationError::NotAFile(_)), "got {err:?}");

        let mut att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        att.subject.path = Some("dist/pipe".into());
        let outcome = tokio::time::timeout(Duration::from_secs(5), builder.verify_outcome(&att))
            .await
            .expect("verify blocked on a FIFO");
        assert!(matches!(outcome, VerificationOutcome::Unverifiable(_)), "got {outcome:?}");
    }

    #[tokio::test]
    async fn test_verify_without_path_is_structural_only() {
        let (_dir, builder) = fixture();
        let mut att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        att.subject.path = None;
        assert_eq!(
            builder.verify_outcome(&att).await,
            VerificationOutcome::StructuralOnly
        );
        assert!(builder.verify(&att).await);
    }

    #[tokio::test]
    async fn test_verify_rejects_inconsistent_structure() {
        let (_dir, builder) = fixture();
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();

        let mut renamed = att.clone();
        renamed.predicate.predicate_type = "https://example.com/other".into();
        assert!(matches!(
            builder.verify_outcome(&renamed).await,
            VerificationOutcome::Malformed(_)
        ));

        let mut anonymous = att.clone();
        anonymous.predicate.builder.id.clear();
        assert!(!builder.verify(&anonymous).await);

        let mut nameless = att;
        nameless.subject.name.clear();
        assert!(!builder.verify(&nameless).await);
    }

    struct FixedAdapter(Option<&'static str>);

    impl ProvenanceAdapter for FixedAdapter {
        fn create_provenance(
            &self,
            subjects: &[Subject],
            _metadata: &BuildMetadata,
        ) -> Result<ProvenanceDocument, AttestationError> {
            let mut doc = json!({ "subjects": subjects.len() });
            if let Some(predicate_type) = self.0 {
                doc["predicateType"] = json!(predicate_type);
            }
            Ok(ProvenanceDocument(doc))
        }
    }

    #[tokio::test]
    async fn test_custom_adapter_predicate_type_is_copied() {
        let (dir, _) = fixture();
        let config = GuardConfig::with_root(dir.path().join("sandbox"));
        let adapter = FixedAdapter(Some("https://example.com/p/v9"));
        let builder = AttestationBuilder::with_adapter(&config, adapter);
        let att = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap();
        assert_eq!(att.predicate.predicate_type, "https://example.com/p/v9");
        assert_eq!(att.slsa_provenance.unwrap()["subjects"], 1);
    }

    #[tokio::test]
    async fn test_adapter_without_predicate_type_fails() {
        let (dir, _) = fixture();
        let config = GuardConfig::with_root(dir.path().join("sandbox"));
        let builder = AttestationBuilder::with_adapter(&config, FixedAdapter(None));
        let err = builder
            .create_attestation("dist/app.bin", builder_info(), MetadataOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AttestationError::Provenance(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attestations() {
        let (dir, builder) = fixture();
        for i in 0..8 {
            fs::write(
                dir.path().join("sandbox/dist").join(format!("part-{i}.bin")),
                format!("part {i}"),
            )
            .unwrap();
        }
        let builder = Arc::new(builder);

        let mut handles = Vec::new();
        for i in 0..8 {
            let builder = Arc::clone(&builder);
            handles.push(tokio::spawn(async move {
                let att = builder
                    .create_attestation(
                        &format!("dist/part-{i}.bin"),
                        BuilderInfo::new("b", "1"),
                        MetadataOverrides::default(),
                    )
                    .await
                    .unwrap();
                assert!(builder.verify(&att).await);
                (i, att)
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            let (i, att) = handle.await.unwrap();
            assert_eq!(att.subject.digest, Digest::of(format!("part {i}").as_bytes()));
            assert!(ids.insert(att.id));
        }
        assert_eq!(ids.len(), 8);
    }
}
