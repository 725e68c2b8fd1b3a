//! Package nodes, dependency linking, and the build scheduler
//!
//! A [`PackageNode`] is one (source package, release) build unit. The
//! [`linker`] wires nodes into a DAG by matching provided binary names
//! against required ones, and the [`scheduler`] walks the DAG with a
//! bounded worker pool, cancelling the fleet on first failure.

pub mod control;
pub mod debian;
mod fsutil;
pub mod linker;
pub mod node;
pub mod rpm;
pub mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use pdibuild_exec::{Downloader, Runner};
use pdibuild_gpg::GpgContext;

pub use node::{NodeState, PackageNode, SourceKind};

/// Everything a build pipeline needs besides the node itself.
///
/// One per output distribution: the signing context is distribution-scoped,
/// the download cache is shared by the whole invocation, and the scratch
/// root is shared by all nodes with per-node subtrees.
pub struct BuildEnv {
    /// Process runner bound to the invocation's cancellation token
    pub runner: Runner,
    /// Shared download cache
    pub downloader: Arc<Downloader>,
    /// Signing context for this distribution config
    pub gpg: GpgContext,
    /// Container registry prefix for builder images
    pub registry: String,
    /// Repository name used for transient local repositories
    pub repo_name: String,
    /// Scratch root; each node owns a uniquely-named subtree
    pub work_root: PathBuf,
}
