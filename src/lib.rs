//! # safeattest -- sandboxed paths and verifiable build attestations
//!
//! Two guarantees for a build pipeline:
//!
//! 1. Every caller-supplied path resolves to a location confined to a
//!    configured sandbox root, with traversal and symlink escapes rejected.
//! 2. Every artifact can be wrapped in a [`BuildAttestation`] (subject digest,
//!    builder identity, recipe, timing, and a SLSA provenance document) that a
//!    consumer verifies by recomputing the digest, not by trusting the producer.
//!
//! ## Security Properties
//!
//! - **No `unsafe`**: `unsafe_code` is forbidden crate-wide.
//! - **Fail-closed resolution**: an unresolvable sandbox root is an error,
//!   never a fallback to the unresolved path.
//! - **Two traversal checks**: lexical before touching the filesystem,
//!   authoritative after canonicalization.
//! - **Total verification**: [`AttestationBuilder::verify`] returns `false`
//!   for every failure mode; it never panics or errors on hostile input.
//! - **Delegated signing**: the `signature` field is a pass-through. The only
//!   cryptographic operation here is SHA-256 via the `sha2` crate.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`fs_guard`] | Sandbox path resolution and bounded reads |
//! | [`digest`] | `sha256:<hex>` content digests |
//! | [`model`] | Attestation records and value types |
//! | [`provenance`] | Provenance adapter seam and SLSA v1 statements |
//! | [`attest`] | Attestation creation and verification |
//! | [`codec`] | JSON encode/decode of attestation records |
//! | [`config`] | Sandbox configuration |
//! | [`error`] | Error types |

pub mod attest;
pub mod codec;
pub mod digest;
pub mod fs_guard;
pub mod model;
pub mod provenance;

/// Configuration: sandbox root, root-itself policy, subject size limit.
pub mod config;

pub mod error;

pub use attest::{AttestationBuilder, MetadataOverrides, VerificationOutcome};
pub use config::GuardConfig;
pub use digest::Digest;
pub use error::{AttestationError, PathError};
pub use fs_guard::{PathGuard, ResolvedPath};
pub use model::{AttestationId, BuildAttestation, BuilderInfo};
pub use provenance::{ProvenanceAdapter, SlsaV1Adapter};
