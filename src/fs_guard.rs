//! Sandbox confinement for caller-supplied paths.
//!
//! [`PathGuard::resolve`] is the only way a caller-supplied string becomes a
//! path this crate will open. Resolution runs two independent traversal
//! checks: a lexical one on the re-rooted candidate before the filesystem is
//! touched, and an authoritative one on the canonical (symlink-free) path.
//! The first alone would let a symlink inside the sandbox point anywhere.

use crate::config::GuardConfig;
use crate::error::{AttestationError, PathError};
use anyhow::{anyhow, Context, Result};
use std::{
    fs, io,
    path::{is_separator, Component, Path, PathBuf},
};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Longest single file name accepted, in bytes.
const MAX_FILENAME_BYTES: usize = 255;

/// Characters never allowed in a bare file name.
const ILLEGAL_FILENAME_CHARS: &[char] = &['/', '?', '<', '>', '\\', ':', '*', '|', '"'];

/// Reads a file after verifying it is not a symlink and is within `max_bytes`.
///
/// Used for operator-supplied inputs (config files, attestation documents),
/// never for sandboxed subjects.
///
/// NOTE: narrow TOCTOU window between `symlink_metadata()` and `fs::read()`.
pub fn read_validated(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.file_type().is_symlink() {
        return Err(anyhow!("Refusing to read symlink: {}", path.display()));
    }
    if meta.len() > max_bytes {
        return Err(anyhow!(
            "File too large: {} ({} bytes, max {max_bytes} bytes)",
            path.display(),
            meta.len(),
        ));
    }
    fs::read(path).with_context(|| format!("read {}", path.display()))
}

/// A canonical path proven, at resolution time, to lie inside the sandbox.
///
/// Not cached anywhere: the entity behind it can change, so anything
/// TOCTOU-sensitive must resolve again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    canonical: PathBuf,
    relative: PathBuf,
}

impl ResolvedPath {
    /// Canonical absolute path.
    pub fn as_path(&self) -> &Path {
        &self.canonical
    }

    /// Path relative to the canonical sandbox root. Safe to show to callers.
    pub fn relative(&self) -> &Path {
        &self.relative
    }
}

/// Resolves untrusted path strings to locations confined to a sandbox root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    allow_root_itself: bool,
}

impl PathGuard {
    /// Creates a guard for the configured root. A relative root is anchored at
    /// the current working directory now, not at each call.
    pub fn new(config: &GuardConfig) -> Self {
        let configured = &config.sandbox_root;
        let absolute = if configured.is_absolute() {
            configured.clone()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(configured),
                Err(error) => {
                    warn!(%error, "cannot read working directory; sandbox root left relative");
                    configured.clone()
                }
            }
        };
        Self {
            root: normalize(&absolute),
            allow_root_itself: config.allow_root_itself,
        }
    }

    /// The configured (not yet canonicalized) sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cheap pre-filter run before any filesystem access.
    ///
    /// A bare file name must survive [`sanitize_filename`] unchanged. A path
    /// with separators must not contain a `..` segment or a doubled separator.
    pub fn validate_syntax(candidate: &str) -> Result<(), PathError> {
        if candidate.is_empty() {
            return Err(PathError::invalid(candidate, "empty path"));
        }
        if candidate.contains('\0') {
            return Err(PathError::invalid(candidate, "contains NUL byte"));
        }

        if !candidate.chars().any(is_separator) {
            let sanitized = sanitize_filename(candidate);
            if sanitized.is_empty() || sanitized != candidate {
                return Err(PathError::invalid(
                    candidate,
                    "disallowed characters or reserved file name",
                ));
            }
            return Ok(());
        }

        if candidate.split(is_separator).any(|segment| segment == "..") {
            return Err(PathError::invalid(candidate, "parent directory reference"));
        }
        let mut prev_sep = false;
        for c in candidate.chars() {
            let sep = is_separator(c);
            if sep && prev_sep {
                return Err(PathError::invalid(candidate, "doubled path separator"));
            }
            prev_sep = sep;
        }
        Ok(())
    }

    /// Resolves `candidate` to a canonical path inside the sandbox.
    ///
    /// Absolute candidates are re-rooted: `/etc/passwd` means
    /// `<root>/etc/passwd`. A missing file yields [`PathError::NotFound`];
    /// everything that is malformed or escapes yields [`PathError::Invalid`].
    pub async fn resolve(&self, candidate: &str) -> Result<ResolvedPath, PathError> {
        self.resolve_inner(candidate)
            .await
            .inspect_err(|error| debug!(%error, "path rejected"))
    }

    async fn resolve_inner(&self, candidate: &str) -> Result<ResolvedPath, PathError> {
        Self::validate_syntax(candidate)?;

        let rerooted = self.reroot(Path::new(candidate));
        self.confined_relative(
            candidate,
            &self.root,
            &rerooted,
            "traverses outside the sandbox root",
        )?;

        // Fail closed: never fall back to the unresolved root.
        let canonical_root = tokio::fs::canonicalize(&self.root).await.map_err(|error| {
            warn!(%error, root = %self.root.display(), "sandbox root cannot be canonicalized");
            PathError::invalid(candidate, "sandbox root is unavailable")
        })?;

        let canonical = tokio::fs::canonicalize(&rerooted)
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => PathError::NotFound(candidate.to_string()),
                _ => PathError::Io {
                    candidate: candidate.to_string(),
                    source,
                },
            })?;

        let relative = self.confined_relative(
            candidate,
            &canonical_root,
            &canonical,
            "resolves outside the sandbox root",
        )?;

        debug!(candidate, resolved = %canonical.display(), "path resolved");
        Ok(ResolvedPath {
            canonical,
            relative,
        })
    }

    /// Splices every component except the filesystem root onto the sandbox
    /// root. `.` disappears here; `..` is kept so the relative check sees it.
    fn reroot(&self, candidate: &Path) -> PathBuf {
        let mut out = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::ParentDir => out.push(Component::ParentDir.as_os_str()),
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            }
        }
        out
    }

    fn confined_relative(
        &self,
        candidate: &str,
        base: &Path,
        path: &Path,
        reason: &'static str,
    ) -> Result<PathBuf, PathError> {
        let relative = path
            .strip_prefix(base)
            .map_err(|_| PathError::invalid(candidate, reason))?;
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathError::invalid(candidate, reason));
        }
        if relative.as_os_str().is_empty() && !self.allow_root_itself {
            return Err(PathError::invalid(candidate, "refers to the sandbox root itself"));
        }
        Ok(relative.to_path_buf())
    }
}

/// Reads a resolved subject, refusing anything that is not a regular file or
/// is larger than `max_bytes`.
///
/// Non-regular files are refused before opening, then the type and size are
/// checked again with `fstat` on the opened handle, so they describe the same
/// inode that is read. The read itself is capped at `max_bytes + 1` in case
/// the file grows after the check.
pub async fn read_subject(
    path: &ResolvedPath,
    candidate: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, AttestationError> {
    let read_err = |source: io::Error| AttestationError::Read {
        candidate: candidate.to_string(),
        source,
    };

    // Refuse FIFOs, sockets and devices before open(2) can block on them.
    let pre = tokio::fs::symlink_metadata(path.as_path())
        .await
        .map_err(read_err)?;
    if !pre.is_file() {
        return Err(AttestationError::NotAFile(candidate.to_string()));
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.read(true);
    // O_NONBLOCK keeps a swap to a FIFO after the check from blocking the
    // open; it has no effect on reads from a regular file.
    #[cfg(unix)]
    options.custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC | libc::O_NONBLOCK);
    let file = options.open(path.as_path()).await.map_err(read_err)?;

    let meta = file.metadata().await.map_err(read_err)?;
    if !meta.is_file() {
        return Err(AttestationError::NotAFile(candidate.to_string()));
    }
    if meta.len() > max_bytes {
        return Err(AttestationError::TooLarge {
            candidate: candidate.to_string(),
            size: meta.len(),
            max: max_bytes,
        });
    }

    let mut bytes = Vec::with_capacity(usize::try_from(meta.len()).unwrap_or(0));
    file.take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .await
        .map_err(read_err)?;

    let read = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if read > max_bytes {
        return Err(AttestationError::TooLarge {
            candidate: candidate.to_string(),
            size: read,
            max: max_bytes,
        });
    }
    Ok(bytes)
}

/// Strips characters and names that are unsafe as a single file name.
///
/// Removes `/ ? < > \ : * | "` and control characters, empties dot-only and
/// Windows device names (`con`, `nul`, `com1`, ...), trims trailing dots and
/// spaces, and truncates to 255 bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !ILLEGAL_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();

    if cleaned.chars().all(|c| c == '.') || is_windows_reserved(&cleaned) {
        return String::new();
    }

    let trimmed = cleaned.trim_end_matches(['.', ' ']);
    truncate_on_char_boundary(trimmed, MAX_FILENAME_BYTES).to_string()
}

fn is_windows_reserved(name: &str) -> bool {
    let stem = name
        .split_once('.')
        .map_or(name, |(stem, _)| stem)
        .to_ascii_lowercase();
    match stem.as_str() {
        "con" | "prn" | "aux" | "nul" => true,
        _ => stem
            .strip_prefix("com")
            .or_else(|| stem.strip_prefix("lpt"))
            .is_some_and(|n| n.len() == 1 && n.bytes().all(|b| b.is_ascii_digit())),
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}

/// Lexically drops `.` segments and resolves `..` against what precedes it.
/// Only applied to the trusted configured root.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathGuard) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sandbox");
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(root.join("dist").join("app.bin"), b"hello").unwrap();
        let guard = PathGuard::new(&GuardConfig::with_root(&root));
        (dir, guard)
    }

    fn assert_invalid(result: Result<ResolvedPath, PathError>) {
        match result {
            Err(PathError::Invalid { .. }) => {}
            other => panic!("expected PathError::Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_accepts_plain_names_and_paths() {
        assert!(PathGuard::validate_syntax("app.bin").is_ok());
        assert!(PathGuard::validate_syntax("dist/app.bin").is_ok());
        assert!(PathGuard::validate_syntax("/etc/passwd").is_ok());
        assert!(PathGuard::validate_syntax("./dist/app.bin").is_ok());
        assert!(PathGuard::validate_syntax("dist/").is_ok());
    }

    #[test]
    fn test_syntax_rejects_malformed() {
        for bad in [
            "",
            "a\0b",
            "dist/a\0b",
            "..",
            ".",
            "...",
            "../etc/passwd",
            "dist/../../etc",
            "dist/..",
            "dist//app.bin",
            "con",
            "NUL.txt",
            "lpt1",
            "name?",
            "what*",
            "trailing.",
            "trailing ",
            "tab\tname",
        ] {
            assert!(
                PathGuard::validate_syntax(bad).is_err(),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_syntax_rejects_overlong_name() {
        let long = "a".repeat(MAX_FILENAME_BYTES + 1);
        assert!(PathGuard::validate_syntax(&long).is_err());
        let exact = "a".repeat(MAX_FILENAME_BYTES);
        assert!(PathGuard::validate_syntax(&exact).is_ok());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.json"), "report.json");
        assert_eq!(sanitize_filename("a<b>c"), "abc");
        assert_eq!(sanitize_filename("com1.log"), "");
        assert_eq!(sanitize_filename("computer"), "computer");
        assert_eq!(sanitize_filename("lpt10"), "lpt10");
        assert_eq!(sanitize_filename("name. . "), "name");
        assert_eq!(sanitize_filename(".."), "");
        assert_eq!(sanitize_filename(".hidden"), ".hidden");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "é".repeat(200); // 400 bytes
        let t = truncate_on_char_boundary(&s, MAX_FILENAME_BYTES);
        assert!(t.len() <= MAX_FILENAME_BYTES);
        assert_eq!(t.len(), 254);
    }

    #[test]
    fn test_new_anchors_relative_root() {
        let guard = PathGuard::new(&GuardConfig::with_root("some/./root"));
        assert!(guard.root().is_absolute());
        assert!(guard.root().ends_with("some/root"));
    }

    #[tokio::test]
    async fn test_resolve_existing_file() {
        let (_dir, guard) = sandbox();
        let resolved = guard.resolve("dist/app.bin").await.unwrap();
        let canonical_root = fs::canonicalize(guard.root()).unwrap();
        assert_eq!(
            resolved.as_path(),
            canonical_root.join("dist").join("app.bin")
        );
        assert_eq!(resolved.relative(), Path::new("dist/app.bin"));
    }

    #[tokio::test]
    async fn test_resolve_collapses_dot_segments() {
        let (_dir, guard) = sandbox();
        let resolved = guard.resolve("./dist/./app.bin").await.unwrap();
        assert_eq!(resolved.relative(), Path::new("dist/app.bin"));
    }

    #[tokio::test]
    async fn test_resolve_missing_file_is_not_found() {
        let (_dir, guard) = sandbox();
        let err = guard.resolve("dist/missing.bin").await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let (_dir, guard) = sandbox();
        assert_invalid(guard.resolve("../etc/passwd").await);
        assert_invalid(guard.resolve("dist/../../outside").await);
    }

    #[tokio::test]
    async fn test_absolute_candidate_is_rerooted() {
        let (_dir, guard) = sandbox();
        fs::create_dir_all(guard.root().join("etc")).unwrap();
        fs::write(guard.root().join("etc").join("passwd"), b"sandboxed").unwrap();

        let resolved = guard.resolve("/etc/passwd").await.unwrap();
        let canonical_root = fs::canonicalize(guard.root()).unwrap();
        assert!(resolved.as_path().starts_with(&canonical_root));
        assert_eq!(resolved.relative(), Path::new("etc/passwd"));
    }

    #[tokio::test]
    async fn test_absolute_candidate_without_sandboxed_copy_is_not_found() {
        let (_dir, guard) = sandbox();
        let err = guard.resolve("/etc/passwd").await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_root_itself_policy() {
        let (_dir, guard) = sandbox();
        assert_invalid(guard.resolve("./").await);
        assert_invalid(guard.resolve("/").await);

        let mut config = GuardConfig::with_root(guard.root());
        config.allow_root_itself = true;
        let permissive = PathGuard::new(&config);
        let resolved = permissive.resolve("/").await.unwrap();
        assert_eq!(resolved.relative(), Path::new(""));
    }

    #[tokio::test]
    async fn test_missing_root_fails_closed() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(&GuardConfig::with_root(dir.path().join("absent")));
        assert_invalid(guard.resolve("anything.txt").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let (dir, guard) = sandbox();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, guard.root().join("escape")).unwrap();

        assert_invalid(guard.resolve("escape/secret.txt").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_within_sandbox_allowed() {
        let (_dir, guard) = sandbox();
        std::os::unix::fs::symlink(
            guard.root().join("dist").join("app.bin"),
            guard.root().join("latest.bin"),
        )
        .unwrap();

        let resolved = guard.resolve("latest.bin").await.unwrap();
        assert_eq!(resolved.relative(), Path::new("dist/app.bin"));
    }

    #[tokio::test]
    async fn test_read_subject_rejects_directory() {
        let (_dir, guard) = sandbox();
        let resolved = guard.resolve("dist").await.unwrap();
        let err = read_subject(&resolved, "dist", 1024).await.unwrap_err();
        assert!(matches!(err, AttestationError::NotAFile(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_read_subject_enforces_limit() {
        let (_dir, guard) = sandbox();
        let resolved = guard.resolve("dist/app.bin").await.unwrap();
        let err = read_subject(&resolved, "dist/app.bin", 4).await.unwrap_err();
        assert!(
            matches!(err, AttestationError::TooLarge { size: 5, max: 4, .. }),
            "got {err:?}"
        );
        let bytes = read_subject(&resolved, "dist/app.bin", 5).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_subject_refuses_fifo_without_blocking() {
        let (_dir, guard) = sandbox();
        let status = std::process::Command::new("mkfifo")
            .arg(guard.root().join("pipe"))
            .status()
            .unwrap();
        assert!(status.success());

        let resolved = guard.resolve("pipe").await.unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            read_subject(&resolved, "pipe", 1024),
        )
        .await
        .expect("read_subject blocked on a FIFO")
        .unwrap_err();
        assert!(matches!(err, AttestationError::NotAFile(_)), "got {err:?}");
    }

    #[test]
    fn test_read_validated_rejects_oversized() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.json");
        fs::write(&file, vec![b'x'; 16]).unwrap();
        let err = read_validated(&file, 8).unwrap_err().to_string();
        assert!(err.contains("too large"), "{err}");
        assert_eq!(read_validated(&file, 16).unwrap().len(), 16);
    }
}
