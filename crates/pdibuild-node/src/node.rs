//! The build unit: one source package on one release

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use pdibuild_core::{Release, Result};
use pdibuild_exec::process::argv;
use pdibuild_exec::Runner;

use crate::control;
use crate::BuildEnv;

/// What kind of packaging metadata the source directory carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `debian/control` present; quilt vs native is settled by
    /// `dpkg-source --print-format` during the build
    Debian,
    /// `<name>.spec` present
    Rpm,
    /// Neither; the node completes as skipped
    Absent,
}

/// Node lifecycle; `Cancelled` is distinct from `Failed` and never reported
/// as an error of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Building,
    Finished,
    Skipped,
    Failed,
    Cancelled,
}

impl NodeState {
    /// States that satisfy a dependent node
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Finished | Self::Skipped)
    }
}

/// One (source package, release) build unit.
pub struct PackageNode {
    /// Source package name; also the directory name under the repo root
    pub name: String,
    /// Target release
    pub release: Release,
    /// Packaging metadata kind
    pub source_kind: SourceKind,
    /// The package's source directory
    pub source_dir: PathBuf,
    /// Template for the upstream tarball URL
    pub orig_url: Option<String>,
    /// Inner build concurrency
    pub parallelism: usize,
    /// Binary package names this node will emit
    pub bin_provides: BTreeSet<String>,
    /// Binary package names needed at build time
    pub bin_requires: BTreeSet<String>,

    state: Mutex<NodeState>,
    outdir: Mutex<Option<PathBuf>>,
    depends_on: Mutex<Vec<Arc<PackageNode>>>,
    resolved: AtomicBool,
}

impl PackageNode {
    /// Create a node from already-extracted metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        release: Release,
        source_kind: SourceKind,
        source_dir: impl Into<PathBuf>,
        orig_url: Option<String>,
        parallelism: usize,
        bin_provides: BTreeSet<String>,
        bin_requires: BTreeSet<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            release,
            source_kind,
            source_dir: source_dir.into(),
            orig_url,
            parallelism,
            bin_provides,
            bin_requires,
            state: Mutex::new(NodeState::Pending),
            outdir: Mutex::new(None),
            depends_on: Mutex::new(Vec::new()),
            resolved: AtomicBool::new(false),
        })
    }

    /// Inspect the source directory and build the node's metadata.
    ///
    /// `<repo>/<name>/debian/control` makes a Debian node, `<repo>/<name>/
    /// <name>.spec` an RPM node (provides and build requirements come from
    /// the spec-query tool), anything else a skipped placeholder.
    pub async fn discover(
        runner: &Runner,
        source_root: &Path,
        name: &str,
        release: Release,
        orig_url: Option<String>,
        parallelism: usize,
    ) -> Result<Arc<Self>> {
        let source_dir = source_root.join(name);
        let control_path = source_dir.join("debian").join("control");
        let spec_path = source_dir.join(format!("{name}.spec"));

        if control_path.is_file() {
            let control = control::parse_control(&std::fs::read_to_string(&control_path)?);
            debug!(package = name, release = %release, "debian node");
            return Ok(Self::new(
                name,
                release,
                SourceKind::Debian,
                source_dir,
                orig_url,
                parallelism,
                control.packages.into_iter().collect(),
                control.build_depends,
            ));
        }

        if spec_path.is_file() {
            let spec = spec_path.to_string_lossy().into_owned();
            let provides = runner
                .run_stdout(&argv(["rpmspec", "-q", "--provides", spec.as_str()]), None)
                .await?;
            let requires = runner
                .run_stdout(&argv(["rpmspec", "-q", "--buildrequires", spec.as_str()]), None)
                .await?;
            debug!(package = name, release = %release, "rpm node");
            return Ok(Self::new(
                name,
                release,
                SourceKind::Rpm,
                source_dir,
                orig_url,
                parallelism,
                bare_names(&provides),
                bare_names(&requires),
            ));
        }

        debug!(package = name, release = %release, "no packaging metadata, node will skip");
        Ok(Self::new(
            name,
            release,
            SourceKind::Absent,
            source_dir,
            orig_url,
            parallelism,
            BTreeSet::new(),
            BTreeSet::new(),
        ))
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        *self.state.lock().unwrap()
    }

    /// Transition to a new state
    pub fn set_state(&self, state: NodeState) {
        *self.state.lock().unwrap() = state;
    }

    /// Captured artifact directory; present once finished
    pub fn outdir(&self) -> Option<PathBuf> {
        self.outdir.lock().unwrap().clone()
    }

    /// Record the captured artifact directory of a successful build
    pub fn set_outdir(&self, outdir: PathBuf) {
        *self.outdir.lock().unwrap() = Some(outdir);
    }

    /// Direct dependencies, populated by the linker
    pub fn depends_on(&self) -> Vec<Arc<PackageNode>> {
        self.depends_on.lock().unwrap().clone()
    }

    /// Replace the dependency set and mark the node resolved
    pub fn set_depends_on(&self, deps: Vec<Arc<PackageNode>>) {
        *self.depends_on.lock().unwrap() = deps;
        self.resolved.store(true, Ordering::Release);
    }

    /// An unlinked node is never ready; after linking, readiness means
    /// pending with every dependency finished or skipped.
    pub fn is_ready(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
            && self.state() == NodeState::Pending
            && self
                .depends_on()
                .iter()
                .all(|dep| dep.state().satisfies_dependents())
    }

    /// Run the per-release build pipeline for this node.
    ///
    /// On success the node ends `Finished` with a populated outdir, or
    /// `Skipped` when there is nothing to build. Errors are returned to the
    /// scheduler, which records the failing state.
    pub async fn build(self: Arc<Self>, env: &BuildEnv) -> Result<()> {
        env.runner.token().check()?;

        match self.source_kind {
            SourceKind::Absent => {
                self.set_state(NodeState::Skipped);
                env.runner.token().check()?;
                Ok(())
            }
            SourceKind::Debian => {
                let outdir = crate::debian::build(env, &self).await?;
                self.set_outdir(outdir);
                self.set_state(NodeState::Finished);
                env.runner.token().check()?;
                Ok(())
            }
            SourceKind::Rpm => {
                let outdir = crate::rpm::build(env, &self).await?;
                self.set_outdir(outdir);
                self.set_state(NodeState::Finished);
                env.runner.token().check()?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for PackageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageNode")
            .field("name", &self.name)
            .field("release", &self.release.uid())
            .field("source_kind", &self.source_kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Strip a spec-query line down to the bare package name: everything from
/// the first `(` or whitespace onward goes.
pub fn bare_names(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let name = line
                .trim()
                .split(|c: char| c == '(' || c.is_whitespace())
                .next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pdibuild_core::release::distribution;
    use pdibuild_exec::CancelToken;

    use super::*;

    fn bookworm() -> Release {
        distribution("debian").unwrap().find("bookworm").unwrap().clone()
    }

    #[test]
    fn test_bare_names() {
        let names = bare_names("libfoo = 1.0-1\nlibfoo(x86-64) = 1.0-1\ncmake >= 3.18\ngcc\n\n");
        let got: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["cmake", "gcc", "libfoo"]);
    }

    #[test]
    fn test_unlinked_node_is_never_ready() {
        let node = PackageNode::new(
            "libfoo",
            bookworm(),
            SourceKind::Debian,
            "/src/libfoo",
            None,
            4,
            BTreeSet::new(),
            BTreeSet::new(),
        );
        assert_eq!(node.state(), NodeState::Pending);
        assert!(!node.is_ready());

        node.set_depends_on(Vec::new());
        assert!(node.is_ready());
    }

    #[test]
    fn test_readiness_follows_dependency_states() {
        let dep = PackageNode::new(
            "libbar",
            bookworm(),
            SourceKind::Debian,
            "/src/libbar",
            None,
            4,
            BTreeSet::new(),
            BTreeSet::new(),
        );
        let node = PackageNode::new(
            "libfoo",
            bookworm(),
            SourceKind::Debian,
            "/src/libfoo",
            None,
            4,
            BTreeSet::new(),
            BTreeSet::new(),
        );
        node.set_depends_on(vec![Arc::clone(&dep)]);

        assert!(!node.is_ready());
        dep.set_state(NodeState::Building);
        assert!(!node.is_ready());
        dep.set_state(NodeState::Finished);
        assert!(node.is_ready());

        dep.set_state(NodeState::Skipped);
        assert!(node.is_ready(), "skipped dependencies do not block");

        dep.set_state(NodeState::Failed);
        assert!(!node.is_ready());
    }

    #[tokio::test]
    async fn test_discover_absent_and_debian() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("empty")).unwrap();

        let debian_dir = root.path().join("libfoo").join("debian");
        std::fs::create_dir_all(&debian_dir).unwrap();
        std::fs::write(
            debian_dir.join("control"),
            "Source: libfoo\nBuild-Depends: cmake\n\nPackage: libfoo1\n",
        )
        .unwrap();

        let runner = Runner::new(CancelToken::new(), false);

        let absent =
            PackageNode::discover(&runner, root.path(), "empty", bookworm(), None, 1)
                .await
                .unwrap();
        assert_eq!(absent.source_kind, SourceKind::Absent);
        assert!(absent.bin_provides.is_empty());

        let debian =
            PackageNode::discover(&runner, root.path(), "libfoo", bookworm(), None, 1)
                .await
                .unwrap();
        assert_eq!(debian.source_kind, SourceKind::Debian);
        assert!(debian.bin_provides.contains("libfoo1"));
        assert!(debian.bin_requires.contains("cmake"));
    }

}
