//! Signed repository assembly
//!
//! Builds APT (aptly-backed) and RPM (createrepo-backed) repositories from
//! captured build artifacts. The same code serves two callers: the per-node
//! local repository fed into a build container, and the final user-facing
//! publish after the whole plan completes.

pub mod debian;
pub mod rpm;
mod templates;

use std::path::{Path, PathBuf};

use pdibuild_core::{Release, Result};
use pdibuild_exec::Runner;
use pdibuild_gpg::GpgContext;

/// One contributing artifact directory.
#[derive(Debug, Clone)]
pub struct RepoSource {
    /// The release the artifacts were built for
    pub release: Release,
    /// Directory of signed artifacts captured from a finished build
    pub outdir: PathBuf,
}

/// Naming and visibility of the produced repository.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Repository name, used for keyring and `.repo` filenames
    pub name: String,
    /// Public base URL; `None` for transient local repositories
    pub url: Option<String>,
    /// Description for the generated README
    pub description: Option<String>,
    /// Container registry prefix for the rpm_tools image
    pub registry: String,
}

/// Build both repository families into `output`.
///
/// Sources are routed by family: `id_like ∋ debian` to the APT branch,
/// `id_like ∋ fedora` to the RPM branch. Either branch is a no-op when no
/// source matches. Repeated invocations over the same inputs regenerate the
/// same layout, signatures aside.
pub async fn publish(
    runner: &Runner,
    gpg: &GpgContext,
    sources: &[RepoSource],
    output: &Path,
    options: &PublishOptions,
) -> Result<()> {
    runner.token().check()?;
    tokio::fs::create_dir_all(output).await?;

    debian::publish(runner, gpg, sources, output, options).await?;
    rpm::publish(runner, gpg, sources, output, options).await?;

    runner.token().check()?;
    Ok(())
}
