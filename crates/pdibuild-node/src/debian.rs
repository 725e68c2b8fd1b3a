//! Per-release Debian build pipeline
//!
//! Stages the source under a scratch tree, rewrites the changelog with the
//! rebuild version, assembles a build-deps package and a local repository
//! of already-built dependencies, runs the builder container, then signs
//! and captures the artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use pdibuild_core::{Error, Result};
use pdibuild_exec::process::argv;
use pdibuild_gpg::arg;
use pdibuild_repo::PublishOptions;

use crate::control;
use crate::fsutil;
use crate::linker;
use crate::node::PackageNode;
use crate::BuildEnv;

/// Accepted output of `dpkg-source --print-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Quilt,
    Native,
}

/// Run the Debian pipeline; returns the captured artifact directory.
pub(crate) async fn build(env: &BuildEnv, node: &Arc<PackageNode>) -> Result<PathBuf> {
    let runner = &env.runner;
    let release = &node.release;
    let codename = release.codename.as_deref().ok_or_else(|| {
        Error::config(format!("release {release} has no codename for a Debian build"))
    })?;

    info!(package = %node.name, release = %release.uid(), "debian build starting");

    let work = env
        .work_root
        .join(format!("{}.{}.deb-build", node.name, release.uid()));
    let output = work.join("output");
    let pkg = work.join("pkg");
    let deps = work.join("deps");
    let repo = work.join("repo");
    for dir in [&output, &pkg, &deps, &repo] {
        std::fs::create_dir_all(dir)?;
    }

    let format = query_source_format(env, node).await?;

    let changelog = std::fs::read_to_string(node.source_dir.join("debian").join("changelog"))?;
    let head = control::parse_head(&changelog)?;
    let (new_changelog, version) =
        control::rebuild_entry(&changelog, release, env.gpg.uid(), Utc::now())?;
    info!(package = %node.name, %version, "rebuild version");

    let upstream = control::upstream_version(&head.version).to_string();
    let src_tree = pkg.join(format!("{}-{}", head.package, upstream));

    match format {
        SourceFormat::Quilt => {
            fsutil::copy_tree(&node.source_dir.join("debian"), &src_tree.join("debian"))?;
            fetch_orig_tarball(env, node, &head.package, &upstream, &pkg).await?;
        }
        SourceFormat::Native => {
            fsutil::copy_tree(&node.source_dir, &src_tree)?;
        }
    }
    std::fs::write(src_tree.join("debian").join("changelog"), &new_changelog)?;

    // a .deb that declares this package's build dependencies
    let profile = format!("-P{},{}", release.distro_id, codename);
    let control_path = src_tree.join("debian").join("control");
    let mkdeps = vec![
        "mk-build-deps".to_string(),
        profile.clone(),
        control_path.to_string_lossy().into_owned(),
    ];
    runner.run(&mkdeps, Some(&deps)).await?;

    build_local_repo(env, node, &repo).await?;

    let image = format!("{}/{}_builder:{}", env.registry, release.distro_id, codename);
    let mut container = argv(["podman", "run", "--rm"]);
    for (host, guest) in [(&pkg, "/src"), (&deps, "/deps"), (&repo, "/localrepo")] {
        container.push("-v".to_string());
        container.push(format!("{}:{}", host.display(), guest));
    }
    container.extend(argv(["--tmpfs", "/tmp:exec", "--shm-size", "5g"]));
    container.push(image);
    container.push(format!("-j{}", node.parallelism));
    container.push("-sa".to_string());
    container.push(profile.clone());
    runner.run(&container, None).await?;

    std::fs::remove_dir_all(&deps)?;
    std::fs::remove_dir_all(&repo)?;

    sign_changes(env, &pkg).await?;

    fsutil::move_top_files(&pkg, &output)?;
    std::fs::remove_dir_all(&pkg)?;

    info!(package = %node.name, outdir = %output.display(), "debian build finished");
    Ok(output)
}

async fn query_source_format(env: &BuildEnv, node: &PackageNode) -> Result<SourceFormat> {
    let probe = vec![
        "dpkg-source".to_string(),
        "--print-format".to_string(),
        node.source_dir.to_string_lossy().into_owned(),
    ];
    let printed = env.runner.run_stdout(&probe, None).await?;
    match printed.lines().next().map(str::trim) {
        Some("3.0 (quilt)") => Ok(SourceFormat::Quilt),
        Some("3.0 (native)") => Ok(SourceFormat::Native),
        other => Err(Error::config(format!(
            "unsupported source format {:?} for {}",
            other.unwrap_or_default(),
            node.name,
        ))),
    }
}

/// Download the upstream tarball next to the staged source and give it the
/// extension its content actually has.
async fn fetch_orig_tarball(
    env: &BuildEnv,
    node: &PackageNode,
    package: &str,
    upstream: &str,
    pkg_dir: &Path,
) -> Result<()> {
    let template = node.orig_url.as_deref().ok_or_else(|| {
        Error::config(format!(
            "package {} is 3.0 (quilt) but has no orig URL configured",
            node.name
        ))
    })?;
    let url = template
        .replace("{package}", package)
        .replace("{upstream_version}", upstream);

    let bare = pkg_dir.join(format!("{package}_{upstream}.orig.tar"));
    env.downloader.fetch(&url, &bare).await?;

    let mut magic = [0u8; 6];
    let read = read_magic(&bare, &mut magic)?;
    let extension = sniff_tar_extension(&magic[..read]);
    if !extension.is_empty() {
        let renamed = PathBuf::from(format!("{}{}", bare.display(), extension));
        std::fs::rename(&bare, renamed)?;
    }
    Ok(())
}

fn read_magic(path: &Path, buffer: &mut [u8]) -> Result<usize> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Pick the tarball extension from the file's magic bytes, not its URL.
pub fn sniff_tar_extension(magic: &[u8]) -> &'static str {
    match magic {
        [0x1f, 0x8b, ..] => ".gz",
        [b'B', b'Z', b'h', ..] => ".bz2",
        [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => ".xz",
        [0x28, 0xb5, 0x2f, 0xfd, ..] => ".zst",
        _ => "",
    }
}

/// Transient signed repository of the node's finished dependency closure.
async fn build_local_repo(env: &BuildEnv, node: &Arc<PackageNode>, repo_dir: &Path) -> Result<()> {
    let sources = linker::closure_sources(node);
    let options = PublishOptions {
        name: env.repo_name.clone(),
        url: None,
        description: None,
        registry: env.registry.clone(),
    };
    pdibuild_repo::publish(&env.runner, &env.gpg, &sources, repo_dir, &options).await
}

async fn sign_changes(env: &BuildEnv, pkg_dir: &Path) -> Result<()> {
    let mut changes: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(pkg_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".changes") {
            changes.push(entry.path().to_string_lossy().into_owned());
        }
    }
    if changes.is_empty() {
        return Err(Error::config(format!(
            "builder produced no .changes file in {}",
            pkg_dir.display()
        )));
    }
    changes.sort();

    let mut sign = argv(["debsign", "--no-conf"]);
    sign.extend(arg(env.gpg.wrapper().to_string_lossy()).prefix("-p").build());
    sign.extend(arg(env.gpg.key_id()).prefix("-k").build());
    sign.push("--debs-dir".to_string());
    sign.push(pkg_dir.to_string_lossy().into_owned());
    sign.extend(changes);
    env.runner.run(&sign, Some(pkg_dir)).await
}
