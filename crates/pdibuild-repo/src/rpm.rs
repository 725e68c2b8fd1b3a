//! RPM repository assembly through createrepo
//!
//! Artifacts are hardlinked into `<output>/<numeric_id>/<arch>/`, indexed by
//! createrepo_c running inside the rpm_tools container as the invoking user,
//! and the resulting `repodata/repomd.xml` is detach-signed.

use std::path::Path;

use nix::unistd::{getgid, getuid};
use tracing::{debug, info};

use pdibuild_core::{Error, Release, Result};
use pdibuild_exec::process::argv;
use pdibuild_exec::Runner;
use pdibuild_gpg::GpgContext;

use crate::templates;
use crate::{PublishOptions, RepoSource};

/// Base URL a build container sees for its mounted local repository.
const LOCAL_BASEURL: &str = "file:///localrepo";

/// Build the RPM side of the repository into `output`.
pub async fn publish(
    runner: &Runner,
    gpg: &GpgContext,
    sources: &[RepoSource],
    output: &Path,
    options: &PublishOptions,
) -> Result<()> {
    let sources: Vec<&RepoSource> = sources
        .iter()
        .filter(|s| s.release.is_like("fedora"))
        .collect();
    if sources.is_empty() {
        return Ok(());
    }

    info!(output = %output.display(), "assembling RPM repository");

    let mut releases: Vec<&Release> = sources.iter().map(|s| &s.release).collect();
    releases.sort();
    releases.dedup();

    for source in &sources {
        link_rpms(source, output)?;
    }

    let key_path = output.join(format!("{}.key", options.name));
    export_key(runner, gpg, &key_path).await?;

    for release in releases {
        runner.token().check()?;
        let release_dir = output.join(&release.id);
        index_release(runner, &release_dir, options).await?;
        sign_repomd(runner, gpg, &release_dir).await?;

        if options.url.is_none() {
            // A build container only sees the mounted release directory, so
            // the key has to live inside it.
            let local_key = release_dir.join(format!("{}.key", options.name));
            if !local_key.exists() {
                std::fs::copy(&key_path, &local_key)?;
            }
        }
        write_repo_file(&release_dir, release, options)?;
    }

    Ok(())
}

/// Hardlink every `*.rpm` of one source into `<output>/<id>/<arch>/`.
fn link_rpms(source: &RepoSource, output: &Path) -> Result<()> {
    if !source.outdir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(&source.outdir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".rpm") {
            continue;
        }
        let arch = rpm_arch(&name).ok_or_else(|| {
            Error::config(format!("cannot derive architecture from rpm name {name}"))
        })?;

        let arch_dir = output.join(&source.release.id).join(arch);
        std::fs::create_dir_all(&arch_dir)?;
        let dest = arch_dir.join(&name);
        if dest.exists() {
            continue;
        }
        debug!(file = %name, arch, "linking into repository");
        if std::fs::hard_link(&path, &dest).is_err() {
            std::fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}

/// The architecture is the second-to-last dotted component of an rpm
/// filename, e.g. `foo-1.0-1.fc38.x86_64.rpm` → `x86_64`.
pub fn rpm_arch(filename: &str) -> Option<&str> {
    let mut parts = filename.rsplit('.');
    let _rpm = parts.next()?;
    parts.next()
}

/// Run createrepo_c over one release directory inside the tools container.
async fn index_release(runner: &Runner, release_dir: &Path, options: &PublishOptions) -> Result<()> {
    let mount = format!("{}:/repo", release_dir.display());
    let user = format!("{}:{}", getuid(), getgid());
    let image = format!("{}/rpm_tools", options.registry);
    runner
        .run(
            &argv([
                "podman",
                "run",
                "--rm",
                "-v",
                mount.as_str(),
                "--user",
                user.as_str(),
                image.as_str(),
                "createrepo_c",
                "/repo",
            ]),
            None,
        )
        .await
}

async fn sign_repomd(runner: &Runner, gpg: &GpgContext, release_dir: &Path) -> Result<()> {
    let repomd = release_dir.join("repodata").join("repomd.xml");
    let signature = release_dir.join("repodata").join("repomd.xml.asc");
    let sign = vec![
        gpg.wrapper().to_string_lossy().into_owned(),
        "--yes".to_string(),
        "--detach-sign".to_string(),
        "--armor".to_string(),
        "--local-user".to_string(),
        gpg.key_id().to_string(),
        "--output".to_string(),
        signature.to_string_lossy().into_owned(),
        repomd.to_string_lossy().into_owned(),
    ];
    runner.run(&sign, None).await
}

async fn export_key(runner: &Runner, gpg: &GpgContext, dest: &Path) -> Result<()> {
    let export = vec![
        gpg.wrapper().to_string_lossy().into_owned(),
        "--yes".to_string(),
        "--armor".to_string(),
        "--output".to_string(),
        dest.to_string_lossy().into_owned(),
        "--export".to_string(),
        gpg.key_id().to_string(),
    ];
    runner.run(&export, None).await
}

/// Emit `<id>/<name>.repo` pointing at either the public URL or the
/// container-local mount.
fn write_repo_file(release_dir: &Path, release: &Release, options: &PublishOptions) -> Result<()> {
    let (baseurl, gpgkey) = match &options.url {
        Some(url) => (
            format!("{url}/{}", release.id),
            format!("{url}/{}.key", options.name),
        ),
        None => (
            LOCAL_BASEURL.to_string(),
            format!("{LOCAL_BASEURL}/{}.key", options.name),
        ),
    };
    let content = templates::render(
        templates::REPO_FILE,
        &[
            ("name", options.name.as_str()),
            ("baseurl", baseurl.as_str()),
            ("gpgkey", gpgkey.as_str()),
        ],
    );
    std::fs::write(release_dir.join(format!("{}.repo", options.name)), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pdibuild_core::release::distribution;

    use super::*;

    fn fedora38() -> Release {
        distribution("fedora").unwrap().find("38").unwrap().clone()
    }

    fn options(url: Option<&str>) -> PublishOptions {
        PublishOptions {
            name: "pdidev".into(),
            url: url.map(str::to_string),
            description: None,
            registry: "localhost".into(),
        }
    }

    #[test]
    fn test_rpm_arch_extraction() {
        assert_eq!(rpm_arch("foo-1.0-1.fc38.x86_64.rpm"), Some("x86_64"));
        assert_eq!(rpm_arch("bar-2.1-3.el8.noarch.rpm"), Some("noarch"));
        assert_eq!(rpm_arch("baz-0.1-1.fc38.src.rpm"), Some("src"));
        assert_eq!(rpm_arch("rpm"), None);
    }

    #[test]
    fn test_link_rpms_layout() {
        let outdir = tempfile::tempdir().unwrap();
        std::fs::write(outdir.path().join("foo-1.0-1.fc38.x86_64.rpm"), b"rpm").unwrap();
        std::fs::write(outdir.path().join("foo-1.0-1.fc38.src.rpm"), b"srpm").unwrap();
        std::fs::write(outdir.path().join("foo.changes"), b"not an rpm").unwrap();

        let output = tempfile::tempdir().unwrap();
        let source = RepoSource { release: fedora38(), outdir: outdir.path().into() };
        link_rpms(&source, output.path()).unwrap();

        assert!(output
            .path()
            .join("38/x86_64/foo-1.0-1.fc38.x86_64.rpm")
            .exists());
        assert!(output.path().join("38/src/foo-1.0-1.fc38.src.rpm").exists());
        assert!(!output.path().join("38/changes").exists());

        // Re-linking the same inputs is a no-op
        link_rpms(&source, output.path()).unwrap();
    }

    #[test]
    fn test_repo_file_public_and_local() {
        let dir = tempfile::tempdir().unwrap();
        let release = fedora38();

        write_repo_file(dir.path(), &release, &options(Some("https://pkg.example.org/rpm")))
            .unwrap();
        let public = std::fs::read_to_string(dir.path().join("pdidev.repo")).unwrap();
        assert!(public.contains("baseurl=https://pkg.example.org/rpm/38"));
        assert!(public.contains("gpgkey=https://pkg.example.org/rpm/pdidev.key"));

        write_repo_file(dir.path(), &release, &options(None)).unwrap();
        let local = std::fs::read_to_string(dir.path().join("pdidev.repo")).unwrap();
        assert!(local.contains("baseurl=file:///localrepo"));
        assert!(local.contains("gpgkey=file:///localrepo/pdidev.key"));
    }
}
