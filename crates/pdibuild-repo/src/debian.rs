//! APT repository assembly through aptly
//!
//! aptly runs against a private config whose filesystem publish endpoint
//! points at the requested output directory. Each release gets a repo keyed
//! by its uid, plus a second one keyed by `uid:suite` so clients can pin
//! either the codename or the suite.

use std::path::Path;

use tracing::{debug, info};

use pdibuild_core::{Error, Release, Result};
use pdibuild_exec::process::argv;
use pdibuild_exec::Runner;
use pdibuild_gpg::{arg, GpgContext};

use crate::templates;
use crate::{PublishOptions, RepoSource};

/// Build the APT side of the repository into `output`.
pub async fn publish(
    runner: &Runner,
    gpg: &GpgContext,
    sources: &[RepoSource],
    output: &Path,
    options: &PublishOptions,
) -> Result<()> {
    let sources: Vec<&RepoSource> = sources
        .iter()
        .filter(|s| s.release.is_like("debian"))
        .collect();
    if sources.is_empty() {
        return Ok(());
    }

    info!(output = %output.display(), "assembling APT repository");

    let scratch = tempfile::Builder::new().prefix("pdibuild-aptly.").tempdir()?;
    let config_path = write_aptly_config(scratch.path(), output)?;
    let config_arg = config_path.to_string_lossy().into_owned();

    let mut releases: Vec<&Release> = sources.iter().map(|s| &s.release).collect();
    releases.sort();
    releases.dedup();

    for release in releases {
        let codename = release.codename.as_deref().ok_or_else(|| {
            Error::config(format!("release {release} has no codename for APT publishing"))
        })?;

        let mut repos = vec![(release.uid(), codename.to_string())];
        if let Some(suite) = &release.suite {
            repos.push((format!("{}:{}", release.uid(), suite), suite.clone()));
        }

        for (repo_name, distribution) in repos {
            let mut create = argv(["aptly", "-config", config_arg.as_str(), "repo", "create"]);
            create.push(format!("-distribution={distribution}"));
            create.push(repo_name.clone());
            runner.run(&create, None).await?;

            for source in sources.iter().filter(|s| &s.release == release) {
                debug!(repo = %repo_name, dir = %source.outdir.display(), "including artifacts");
                let mut include =
                    argv(["aptly", "-config", config_arg.as_str(), "repo", "include"]);
                include.push("-no-remove-files".to_string());
                include.extend(
                    arg(gpg.public_keyring().to_string_lossy())
                        .prefix("-keyring=")
                        .build(),
                );
                include.push(format!("-repo={repo_name}"));
                include.push(source.outdir.to_string_lossy().into_owned());
                runner.run(&include, None).await?;
            }

            let mut publish =
                argv(["aptly", "-config", config_arg.as_str(), "publish", "repo", "-batch"]);
            publish.extend(arg(gpg.short_key_id()).prefix("-gpg-key=").build());
            publish.extend(
                arg(gpg.public_keyring().to_string_lossy())
                    .prefix("-keyring=")
                    .build(),
            );
            publish.extend(arg(gpg.passphrase()).prefix("-passphrase=").build());
            if options.url.is_some() {
                publish.extend(arg(options.name.as_str()).prefix("-label=").build());
                publish.extend(arg(options.name.as_str()).prefix("-origin=").build());
            }
            publish.push(format!("-distribution={distribution}"));
            publish.push(repo_name.clone());
            publish.push("filesystem:default:".to_string());
            runner.run(&publish, None).await?;
        }
    }

    if options.url.is_some() {
        export_keyring(runner, gpg, output, options).await?;
        write_docs(&sources, output, options)?;
    }

    Ok(())
}

/// aptly config with its root in scratch space and a filesystem endpoint at
/// the output directory.
fn write_aptly_config(scratch: &Path, output: &Path) -> Result<std::path::PathBuf> {
    let config = serde_json::json!({
        "rootDir": scratch.join("root"),
        "FileSystemPublishEndpoints": {
            "default": {
                "rootDir": output,
                "linkMethod": "copy",
            }
        }
    });
    let path = scratch.join("aptly.conf");
    std::fs::write(&path, serde_json::to_string_pretty(&config).expect("static json"))?;
    Ok(path)
}

async fn export_keyring(
    runner: &Runner,
    gpg: &GpgContext,
    output: &Path,
    options: &PublishOptions,
) -> Result<()> {
    let keyring = output.join(format!("{}-archive-keyring.gpg", options.name));
    let export = vec![
        gpg.wrapper().to_string_lossy().into_owned(),
        "--yes".to_string(),
        "--armor".to_string(),
        "--output".to_string(),
        keyring.to_string_lossy().into_owned(),
        "--export".to_string(),
        gpg.key_id().to_string(),
    ];
    runner.run(&export, None).await
}

/// README plus per-release install snippets.
fn write_docs(sources: &[&RepoSource], output: &Path, options: &PublishOptions) -> Result<()> {
    let baseurl = options.url.as_deref().unwrap_or_default();
    let keyring = format!("{}-archive-keyring.gpg", options.name);

    let mut releases: Vec<&Release> = sources.iter().map(|s| &s.release).collect();
    releases.sort();
    releases.dedup();

    let mut sections = String::new();
    for release in releases {
        let codename = release.codename.as_deref().unwrap_or_default();
        let snippet = templates::render(
            templates::APT_INSTALL,
            &[
                ("dist_release", &release.to_string()),
                ("codename", codename),
                ("baseurl", baseurl),
                ("keyring", &keyring),
                ("name", &options.name),
            ],
        );
        std::fs::write(output.join(format!("INSTALL-{}.md", release.uid())), &snippet)?;
        sections.push_str(&snippet);
        sections.push('\n');
    }

    let readme = templates::render(
        templates::README,
        &[
            ("name", &options.name),
            ("description", options.description.as_deref().unwrap_or_default()),
            ("sections", sections.trim_end()),
        ],
    );
    std::fs::write(output.join("README.md"), readme)?;
    Ok(())
}
