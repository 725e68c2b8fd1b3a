//! Configuration management for pdibuild
//!
//! Parses the declarative YAML build configuration, resolves release
//! selectors against the catalog, and implements the `-D` distribution
//! filters accepted on the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use pdibuild_core::release::{catalog, DistInfo};
use pdibuild_core::{Error, Release, Result};

/// Main configuration structure, one per `build.conf`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Container registry prefix for builder images
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Output distribution configurations, keyed by distro id
    pub distribs: BTreeMap<String, DistribConfig>,

    /// Source packages to build, keyed by directory name under the repo root
    pub packages: BTreeMap<String, PackageConfig>,
}

/// Per-distribution configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistribConfig {
    /// Signing key material
    pub gpg: GpgConfig,

    /// Release selectors per target distribution id
    pub versions: BTreeMap<String, Vec<String>>,

    /// Where and how to publish the final repository
    pub repository: RepositoryConfig,
}

/// Signing key configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpgConfig {
    /// Path to the private key file
    pub file: PathBuf,

    /// Key id hint; the last 8 hex digits are matched case-insensitively
    #[serde(default)]
    pub id: Option<String>,

    /// Uid hint matched against the key's uid records
    #[serde(default)]
    pub uid: Option<String>,
}

/// Final repository configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Directory the final repository is published into
    pub path: PathBuf,

    /// Public base URL; enables keyring export and install snippets
    #[serde(default)]
    pub url: Option<String>,

    /// Repository name used in filenames (`<name>.repo`, keyring)
    pub name: String,

    /// Human-readable description for the generated README
    #[serde(default)]
    pub description: Option<String>,
}

/// Per-package configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// URL template for the upstream tarball; `{package}` and
    /// `{upstream_version}` are substituted
    #[serde(default)]
    pub orig: Option<String>,

    /// Inner build concurrency; defaults to the host CPU count
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Release selectors the package must NOT be built on, per distro id
    #[serde(default)]
    pub disable: BTreeMap<String, Vec<String>>,
}

fn default_registry() -> String {
    "localhost".to_string()
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate selector targets and repository paths
    pub fn validate(&self) -> Result<()> {
        if self.distribs.is_empty() {
            return Err(Error::config("no distributions configured"));
        }

        let known: Vec<String> = catalog().into_iter().map(|d| d.id).collect();
        for (out_id, distrib) in &self.distribs {
            for target in distrib.versions.keys() {
                if !known.iter().any(|id| id == target) {
                    return Err(Error::config(format!(
                        "distribs.{out_id}.versions references unknown distribution {target}"
                    )));
                }
            }
            if distrib.repository.name.is_empty() {
                return Err(Error::config(format!(
                    "distribs.{out_id}.repository.name must not be empty"
                )));
            }
        }

        for (name, package) in &self.packages {
            for target in package.disable.keys() {
                if !known.iter().any(|id| id == target) {
                    return Err(Error::config(format!(
                        "packages.{name}.disable references unknown distribution {target}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Resolve every release selected by one output distribution's
    /// `versions` table, in catalog order.
    pub fn selected_releases(&self, distrib: &DistribConfig) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        for (target_id, selectors) in &distrib.versions {
            let dist = pdibuild_core::release::distribution(target_id)
                .ok_or_else(|| Error::config(format!("unknown distribution {target_id}")))?;
            for release in resolve_selectors(&dist, selectors)? {
                if !releases.contains(&release) {
                    releases.push(release);
                }
            }
        }
        releases.sort();
        Ok(releases)
    }
}

impl PackageConfig {
    /// True when the package is disabled on the given release
    pub fn disabled_on(&self, release: &Release) -> Result<bool> {
        let Some(selectors) = self.disable.get(&release.distro_id) else {
            return Ok(false);
        };
        let dist = pdibuild_core::release::distribution(&release.distro_id)
            .ok_or_else(|| Error::config(format!("unknown distribution {}", release.distro_id)))?;
        Ok(resolve_selectors(&dist, selectors)?.contains(release))
    }
}

/// Resolve a selector list against one distribution.
///
/// `supported` selects every currently-supported release, `all` every known
/// release; a literal word matches codename, suite, numeric id, or name.
/// `+` and `-` extend the immediately-preceding selector's result forward or
/// backward through the release history.
pub fn resolve_selectors(dist: &DistInfo, selectors: &[String]) -> Result<Vec<Release>> {
    let mut out: Vec<Release> = Vec::new();
    let mut prev: Vec<Release> = Vec::new();

    for selector in selectors {
        let step: Vec<Release> = match selector.as_str() {
            "supported" => dist.supported().into_iter().cloned().collect(),
            "all" => dist.releases().to_vec(),
            "+" => {
                let top = prev.iter().map(|r| r.order).max().ok_or_else(|| {
                    Error::config(format!("selector '+' without a preceding selector for {}", dist.id))
                })?;
                dist.releases().iter().filter(|r| r.order > top).cloned().collect()
            }
            "-" => {
                let bottom = prev.iter().map(|r| r.order).min().ok_or_else(|| {
                    Error::config(format!("selector '-' without a preceding selector for {}", dist.id))
                })?;
                dist.releases().iter().filter(|r| r.order < bottom).cloned().collect()
            }
            word => {
                let release = dist.find(word).ok_or_else(|| {
                    Error::config(format!("unknown release selector {word} for {}", dist.id))
                })?;
                vec![release.clone()]
            }
        };

        for release in &step {
            if !out.contains(release) {
                out.push(release.clone());
            }
        }
        prev = step;
    }

    out.sort();
    Ok(out)
}

/// One `-D` command line filter.
///
/// Accepted shapes: `distro`, `distro:codename`, `distro:suite`,
/// `distro:id`, and `distro:name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistFilter {
    /// Distribution id the filter applies to
    pub distro_id: String,
    /// Release word; `None` selects the whole distribution
    pub release: Option<String>,
}

impl DistFilter {
    /// True when the release passes this filter
    pub fn matches(&self, release: &Release) -> bool {
        release.distro_id == self.distro_id
            && self
                .release
                .as_deref()
                .map(|word| release.answers_to(word))
                .unwrap_or(true)
    }
}

impl FromStr for DistFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (distro_id, release) = match s.split_once(':') {
            Some((distro, word)) => (distro, Some(word.to_string())),
            None => (s, None),
        };
        if distro_id.is_empty() {
            return Err(Error::config(format!("empty distribution in filter {s:?}")));
        }
        Ok(Self { distro_id: distro_id.to_string(), release })
    }
}

/// Apply a filter list: a release survives when any filter matches.
/// An empty list keeps everything.
pub fn filter_releases(releases: Vec<Release>, filters: &[DistFilter]) -> Vec<Release> {
    if filters.is_empty() {
        return releases;
    }
    releases
        .into_iter()
        .filter(|r| filters.iter().any(|f| f.matches(r)))
        .collect()
}
