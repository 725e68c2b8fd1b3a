//! Per-release RPM build pipeline
//!
//! Stages the spec file, assembles a local repository of finished
//! dependencies, downloads every Source declared by the rendered spec,
//! runs the builder container, then re-signs and captures the rpms.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::info;

use pdibuild_core::Result;
use pdibuild_exec::process::argv;
use pdibuild_gpg::arg;
use pdibuild_repo::PublishOptions;

use crate::linker;
use crate::node::PackageNode;
use crate::BuildEnv;

/// Run the RPM pipeline; returns the captured artifact directory.
pub(crate) async fn build(env: &BuildEnv, node: &Arc<PackageNode>) -> Result<PathBuf> {
    let runner = &env.runner;
    let release = &node.release;

    info!(package = %node.name, release = %release.uid(), "rpm build starting");

    let work = env
        .work_root
        .join(format!("{}.{}.rpm-build", node.name, release.uid()));
    let output = work.join("output");
    let pkg = work.join("pkg");
    let repo = work.join("repo");
    for dir in [&output, &pkg, &repo] {
        std::fs::create_dir_all(dir)?;
    }

    let spec_name = format!("{}.spec", node.name);
    let spec_path = pkg.join(&spec_name);
    std::fs::copy(node.source_dir.join(&spec_name), &spec_path)?;

    build_local_repo(env, node, &repo).await?;

    let rendered = runner
        .run_stdout(
            &argv(["rpmspec", "-P", spec_path.to_string_lossy().as_ref()]),
            None,
        )
        .await?;
    for url in source_urls(&rendered) {
        let filename = source_filename(&url);
        env.downloader.fetch(&url, &pkg.join(filename)).await?;
    }

    let image = format!("{}/{}_builder:{}", env.registry, release.distro_id, release.id);
    let local_repo = repo.join(&release.id);
    let mut container = argv(["podman", "run", "--rm"]);
    for (host, guest) in [(&pkg, "/src"), (&local_repo, "/localrepo")] {
        container.push("-v".to_string());
        container.push(format!("{}:{}", host.display(), guest));
    }
    container.extend(argv(["--tmpfs", "/tmp:exec", "--shm-size", "5g"]));
    container.push(image);
    runner.run(&container, None).await?;

    std::fs::remove_dir_all(&repo)?;

    resign_rpms(env, &pkg).await?;

    for entry in std::fs::read_dir(&pkg)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".rpm") {
            std::fs::rename(entry.path(), output.join(entry.file_name()))?;
        }
    }
    std::fs::remove_dir_all(&pkg)?;

    info!(package = %node.name, outdir = %output.display(), "rpm build finished");
    Ok(output)
}

async fn build_local_repo(env: &BuildEnv, node: &Arc<PackageNode>, repo_dir: &Path) -> Result<()> {
    let sources = linker::closure_sources(node);
    let options = PublishOptions {
        name: env.repo_name.clone(),
        url: None,
        description: None,
        registry: env.registry.clone(),
    };
    pdibuild_repo::publish(&env.runner, &env.gpg, &sources, repo_dir, &options).await?;
    // the container mounts <repo>/<numeric_id>; make sure it exists even
    // for a node without dependencies
    std::fs::create_dir_all(repo_dir.join(&node.release.id))?;
    Ok(())
}

/// `SourceN:` URLs of a rendered spec, in declaration order.
pub fn source_urls(rendered_spec: &str) -> Vec<String> {
    let source_re = Regex::new(r"(?i)^\s*source[0-9]*\s*:\s*(\S+)").expect("valid regex");
    rendered_spec
        .lines()
        .filter_map(|line| source_re.captures(line))
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Local filename for a source URL: the value of the last `name=value`
/// query pair when present, otherwise the basename of the path.
pub fn source_filename(url: &str) -> String {
    if let Some((path, query)) = url.split_once('?') {
        if let Some(pair) = query.split('&').filter(|p| p.contains('=')).next_back() {
            let (_, value) = pair.split_once('=').expect("pair contains '='");
            return value.to_string();
        }
        return path.rsplit('/').next().unwrap_or(path).to_string();
    }
    url.rsplit('/').next().unwrap_or(url).to_string()
}

async fn resign_rpms(env: &BuildEnv, pkg_dir: &Path) -> Result<()> {
    let mut rpms: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(pkg_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".rpm") {
            rpms.push(entry.path());
        }
    }
    rpms.sort();

    let wrapper = env.gpg.wrapper().to_string_lossy().into_owned();
    for rpm in rpms {
        let mut sign = argv(["rpm"]);
        sign.extend(
            arg(wrapper.as_str())
                .lead(["--define"])
                .prefix("_gpg_bin ")
                .build(),
        );
        sign.extend(arg(wrapper.as_str()).lead(["--define"]).prefix("__gpg ").build());
        sign.extend(
            arg(env.gpg.home().to_string_lossy())
                .lead(["--define"])
                .prefix("_gpg_home ")
                .build(),
        );
        sign.extend(
            arg(env.gpg.key_id())
                .lead(["--define"])
                .prefix("_gpg_name ")
                .build(),
        );
        sign.push("--resign".to_string());
        sign.push(rpm.to_string_lossy().into_owned());
        env.runner.run(&sign, None).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_urls_from_rendered_spec() {
        let spec = "\
Name: foo
Version: 1.2
source0: https://example.org/foo-1.2.tar.gz
SOURCE1 : https://example.org/extras.tar.xz
Source: https://example.org/bare.tar.gz
Patch0: local.patch
 source9: https://example.org/indented.tar.gz
";
        assert_eq!(
            source_urls(spec),
            vec![
                "https://example.org/foo-1.2.tar.gz",
                "https://example.org/extras.tar.xz",
                "https://example.org/bare.tar.gz",
                "https://example.org/indented.tar.gz",
            ]
        );
    }

    #[test]
    fn test_source_filename_basename() {
        assert_eq!(
            source_filename("https://example.org/pub/foo-1.2.tar.gz"),
            "foo-1.2.tar.gz"
        );
    }

    #[test]
    fn test_source_filename_query_pair_wins() {
        assert_eq!(
            source_filename("https://example.org/download?project=foo&filename=foo-1.2.tar.gz"),
            "foo-1.2.tar.gz"
        );
        // last pair wins
        assert_eq!(
            source_filename("https://example.org/dl?file=a.tar&file=b.tar"),
            "b.tar"
        );
    }

    #[test]
    fn test_source_filename_query_without_pairs() {
        assert_eq!(
            source_filename("https://example.org/pub/foo.tar.gz?mirror"),
            "foo.tar.gz"
        );
    }
}
