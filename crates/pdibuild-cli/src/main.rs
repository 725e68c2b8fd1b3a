//! Main CLI entry point for pdibuild

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pdibuild_config::{filter_releases, Config, DistFilter};
use pdibuild_core::{Error, Result};
use pdibuild_exec::{CancelToken, Downloader, Runner};
use pdibuild_gpg::GpgContext;
use pdibuild_node::{linker, scheduler, BuildEnv, NodeState, PackageNode};
use pdibuild_repo::{PublishOptions, RepoSource};

/// pdibuild - build signed Debian and RPM package repositories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// GPG passphrase for the configured signing keys
    #[arg(short, long, default_value = "")]
    passphrase: String,

    /// Inherit child output; forces one build at a time
    #[arg(short, long)]
    verbose: bool,

    /// On error, prompt before cleaning up the work directory
    #[arg(short, long)]
    interactive: bool,

    /// Restrict the build to matching releases; repeatable
    /// (distro, distro:codename, distro:suite, distro:id, distro:name)
    #[arg(short = 'D', long = "distributions", value_name = "FILTER")]
    distributions: Vec<String>,

    /// Scheduler pool size; defaults to CPU count + 1
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Configuration file
    #[arg(value_name = "build.conf", default_value = "./build.conf")]
    config: PathBuf,
}

fn main() {
    color_eyre::install().expect("error report hook installs once");

    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let token = CancelToken::new();
    setup_signal_handlers(token.clone());

    let work_root = match tempfile::Builder::new().prefix("pdibuild.").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("cannot create work directory: {e}");
            return 3;
        }
    };

    match build_all(&cli, token, work_root.path().to_path_buf()).await {
        Ok(()) => 0,
        Err(error) => {
            report(&error);
            let keep = if cli.interactive {
                !confirm(&format!(
                    "Remove work directory {}?",
                    work_root.path().display()
                ))
            } else {
                true
            };
            if keep {
                let path = work_root.into_path();
                eprintln!("work directory kept for inspection: {}", path.display());
            }
            error.exit_code()
        }
    }
}

/// Print one error the way its kind demands.
fn report(error: &Error) {
    match error {
        Error::Cancelled => eprintln!("interrupted"),
        Error::Subprocess { argv, code, output } => {
            eprintln!("command failed with exit code {code}: {}", argv.join(" "));
            eprintln!("{output}");
        }
        other => eprintln!("error: {other}"),
    }
}

async fn build_all(cli: &Cli, token: CancelToken, work_root: PathBuf) -> Result<()> {
    let config = Config::from_file(&cli.config)?;
    let filters = cli
        .distributions
        .iter()
        .map(|s| s.parse::<DistFilter>())
        .collect::<Result<Vec<_>>>()?;

    let source_root = cli
        .config
        .canonicalize()?
        .parent()
        .map(PathBuf::from)
        .ok_or_else(|| Error::config("configuration file has no parent directory"))?;

    let runner = Runner::new(token.clone(), cli.verbose);
    let downloader = Arc::new(Downloader::new(token.clone())?);

    let jobs = if cli.verbose {
        1
    } else {
        cli.jobs.unwrap_or_else(default_jobs)
    };
    let parallelism = default_jobs().saturating_sub(1).max(1);

    for (distro_id, distrib) in &config.distribs {
        token.check()?;

        let releases = filter_releases(config.selected_releases(distrib)?, &filters);
        if releases.is_empty() {
            info!(distrib = %distro_id, "no releases selected, skipping");
            continue;
        }

        let gpg = GpgContext::new(
            &runner,
            &distrib.gpg.file,
            &cli.passphrase,
            distrib.gpg.id.as_deref(),
            distrib.gpg.uid.as_deref(),
        )
        .await?;

        let env = Arc::new(BuildEnv {
            runner: runner.clone(),
            downloader: Arc::clone(&downloader),
            gpg,
            registry: config.registry.clone(),
            repo_name: distrib.repository.name.clone(),
            work_root: work_root.clone(),
        });

        let mut nodes: Vec<Arc<PackageNode>> = Vec::new();
        for release in &releases {
            for (name, package) in &config.packages {
                if package.disabled_on(release)? {
                    info!(package = %name, release = %release.uid(), "disabled, skipping");
                    continue;
                }
                let node = PackageNode::discover(
                    &runner,
                    &source_root,
                    name,
                    release.clone(),
                    package.orig.clone(),
                    package.jobs.unwrap_or(parallelism),
                )
                .await?;
                nodes.push(node);
            }
        }

        linker::link(&nodes)?;
        info!(
            distrib = %distro_id,
            nodes = nodes.len(),
            releases = releases.len(),
            jobs,
            "build plan ready"
        );

        let build = {
            let env = Arc::clone(&env);
            move |node: Arc<PackageNode>| {
                let env = Arc::clone(&env);
                async move { node.build(&env).await }
            }
        };
        scheduler::run(nodes.clone(), jobs, token.clone(), build).await?;

        publish_final(&runner, &env, &nodes, distrib, &config.registry).await?;
    }

    info!("all repositories published");
    Ok(())
}

/// Assemble the user-facing repository from every finished node.
async fn publish_final(
    runner: &Runner,
    env: &BuildEnv,
    nodes: &[Arc<PackageNode>],
    distrib: &pdibuild_config::DistribConfig,
    registry: &str,
) -> Result<()> {
    let sources: Vec<RepoSource> = nodes
        .iter()
        .filter(|n| n.state() == NodeState::Finished)
        .filter_map(|n| {
            n.outdir().map(|outdir| RepoSource {
                release: n.release.clone(),
                outdir,
            })
        })
        .collect();

    let options = PublishOptions {
        name: distrib.repository.name.clone(),
        url: distrib.repository.url.clone(),
        description: distrib.repository.description.clone(),
        registry: registry.to_string(),
    };
    pdibuild_repo::publish(runner, &env.gpg, &sources, &distrib.repository.path, &options).await
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        + 1
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn setup_signal_handlers(token: CancelToken) {
    let sigint_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            sigint_token.request_cancel();
        }
    });

    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installs once");
        sigterm.recv().await;
        info!("received SIGTERM");
        token.request_cancel();
    });
}

/// y/N prompt on stderr; default is no.
fn confirm(question: &str) -> bool {
    use std::io::{BufRead, Write};

    eprint!("{question} [y/N]: ");
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("y")
}
