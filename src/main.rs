use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use safeattest::{
    attest::DEFAULT_RECIPE_TYPE,
    codec,
    config::SANDBOX_ROOT_ENV,
    fs_guard,
    model::{RecipeInfo, ResourceDescriptor},
    AttestationBuilder, BuilderInfo, Digest, GuardConfig, MetadataOverrides, PathGuard,
    VerificationOutcome,
};
use std::{fs, path::PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Defensive limit for attestation documents read from disk.
const MAX_ATTESTATION_BYTES: u64 = 20 * 1024 * 1024; // 20MB

#[derive(Parser)]
#[command(
    name = "safeattest",
    about = "Sandboxed path resolution and verifiable build attestations",
    version
)]
struct Cli {
    /// Sandbox root (overrides the config file)
    #[arg(long, global = true, env = SANDBOX_ROOT_ENV)]
    sandbox_root: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Accept paths that resolve to the sandbox root itself
    #[arg(long, global = true)]
    allow_root_itself: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Resolve a path inside the sandbox and print it relative to the root
    Resolve { path: String },

    /// Print the sha256 digest of a file inside the sandbox
    Digest { path: String },

    /// Attest a file inside the sandbox
    Attest {
        path: String,

        #[arg(long)]
        builder_id: String,

        #[arg(long)]
        builder_version: String,

        /// Recipe type URI (defaults to the file recipe)
        #[arg(long)]
        recipe_type: Option<String>,

        #[arg(long)]
        entry_point: Option<String>,

        /// Build invocation id (defaults to a fresh UUID)
        #[arg(long)]
        invocation_id: Option<String>,

        /// Claim the build is reproducible
        #[arg(long)]
        reproducible: bool,

        /// Build input as URI=sha256:HEX (repeatable)
        #[arg(long)]
        material: Vec<String>,

        /// Write the attestation here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify an attestation document against the sandbox
    Verify { attestation: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.to_string())),
        )
        .init();

    let config = load_config(&cli)?;

    match cli.cmd {
        Cmd::Resolve { path } => {
            let resolved = PathGuard::new(&config).resolve(&path).await?;
            println!("{}", resolved.relative().display());
            Ok(())
        }
        Cmd::Digest { path } => {
            let resolved = PathGuard::new(&config).resolve(&path).await?;
            let bytes = fs_guard::read_subject(&resolved, &path, config.max_subject_bytes).await?;
            println!("{}", Digest::of(&bytes));
            Ok(())
        }
        Cmd::Attest {
            path,
            builder_id,
            builder_version,
            recipe_type,
            entry_point,
            invocation_id,
            reproducible,
            material,
            out,
        } => {
            let recipe = (recipe_type.is_some() || entry_point.is_some()).then(|| {
                let mut recipe = RecipeInfo::new(
                    recipe_type.unwrap_or_else(|| DEFAULT_RECIPE_TYPE.to_string()),
                );
                recipe.entry_point = entry_point;
                recipe
            });
            let materials = material
                .iter()
                .map(String::as_str)
                .map(parse_material)
                .collect::<Result<Vec<_>>>()?;
            let overrides = MetadataOverrides {
                recipe,
                reproducible: Some(reproducible),
                build_invocation_id: invocation_id,
                materials,
                ..MetadataOverrides::default()
            };

            let att = AttestationBuilder::new(&config)
                .create_attestation(
                    &path,
                    BuilderInfo::new(builder_id, builder_version),
                    overrides,
                )
                .await?;
            let text = codec::encode(&att)?;
            match out {
                Some(out) => {
                    fs::write(&out, text.as_bytes())
                        .with_context(|| format!("writing {}", out.display()))?;
                    println!("→ {} ({})", att.id, att.subject.digest);
                }
                None => println!("{text}"),
            }
            Ok(())
        }
        Cmd::Verify { attestation } => {
            let text = fs_guard::read_validated(&attestation, MAX_ATTESTATION_BYTES)?;
            let text = std::str::from_utf8(&text).context("attestation is not UTF-8")?;
            let att = codec::decode(text)?;

            let outcome = AttestationBuilder::new(&config).verify_outcome(&att).await;
            match outcome {
                VerificationOutcome::Verified => println!("✓ {}: {outcome}", att.id),
                VerificationOutcome::StructuralOnly => eprintln!("⚠ {}: {outcome}", att.id),
                _ => eprintln!("✗ {}: {outcome}", att.id),
            }
            if outcome.is_accepted() {
                Ok(())
            } else {
                Err(anyhow!("Verification failed"))
            }
        }
    }
}

/// Flag or `SAFE_ROOT` first, then the config file, then defaults.
fn load_config(cli: &Cli) -> Result<GuardConfig> {
    let mut config = GuardConfig::load(cli.config.as_deref())?;
    if let Some(root) = &cli.sandbox_root {
        config.sandbox_root.clone_from(root);
    }
    if cli.allow_root_itself {
        config.allow_root_itself = true;
    }
    Ok(config)
}

fn parse_material(arg: &str) -> Result<ResourceDescriptor> {
    let (uri, digest) = arg
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("material must be URI=sha256:HEX, got {arg:?}"))?;
    if uri.is_empty() {
        return Err(anyhow!("material URI is empty in {arg:?}"));
    }
    let digest = Digest::parse(digest).with_context(|| format!("material {uri}"))?;
    Ok(ResourceDescriptor::new(uri, &digest))
}
