//! Wires package nodes into a DAG
//!
//! Providers are matched against requirements within each release. Two
//! nodes of one release claiming the same binary name is a configuration
//! error; a requirement nothing provides simply stays unlinked, making the
//! node a root of its own.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use pdibuild_core::{Error, Result};

use crate::node::PackageNode;

/// Resolve every node's dependency set from the provides/requires sets.
pub fn link(nodes: &[Arc<PackageNode>]) -> Result<()> {
    let mut providers: HashMap<(String, String), Arc<PackageNode>> = HashMap::new();

    for node in nodes {
        for binary in &node.bin_provides {
            let key = (binary.clone(), node.release.uid());
            if let Some(existing) = providers.get(&key) {
                if !Arc::ptr_eq(existing, node) {
                    return Err(Error::DuplicateProvider {
                        binary: binary.clone(),
                        release: node.release.to_string(),
                        first: existing.name.clone(),
                        second: node.name.clone(),
                    });
                }
            }
            providers.insert(key, Arc::clone(node));
        }
    }

    for node in nodes {
        let mut deps: Vec<Arc<PackageNode>> = Vec::new();
        for required in &node.bin_requires {
            let key = (required.clone(), node.release.uid());
            let Some(provider) = providers.get(&key) else {
                continue;
            };
            // self-provided build dependencies are naturally satisfied
            if Arc::ptr_eq(provider, node) {
                continue;
            }
            if !deps.iter().any(|d| Arc::ptr_eq(d, provider)) {
                deps.push(Arc::clone(provider));
            }
        }
        debug!(
            package = %node.name,
            release = %node.release.uid(),
            deps = deps.len(),
            "node linked"
        );
        node.set_depends_on(deps);
    }

    Ok(())
}

/// Artifact directories of every node in the dependency closure, excluding
/// the node itself and anything without captured output. This is the input
/// shape the local repository builder consumes.
pub fn closure_sources(node: &Arc<PackageNode>) -> Vec<pdibuild_repo::RepoSource> {
    closure(node)
        .into_iter()
        .filter(|member| !Arc::ptr_eq(member, node))
        .filter_map(|member| {
            member.outdir().map(|outdir| pdibuild_repo::RepoSource {
                release: member.release.clone(),
                outdir,
            })
        })
        .collect()
}

/// Every node reachable through `depends_on`, including `node` itself.
pub fn closure(node: &Arc<PackageNode>) -> Vec<Arc<PackageNode>> {
    let mut seen: Vec<Arc<PackageNode>> = vec![Arc::clone(node)];
    let mut queue: Vec<Arc<PackageNode>> = vec![Arc::clone(node)];

    while let Some(current) = queue.pop() {
        for dep in current.depends_on() {
            if !seen.iter().any(|s| Arc::ptr_eq(s, &dep)) {
                seen.push(Arc::clone(&dep));
                queue.push(dep);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pdibuild_core::release::distribution;
    use pdibuild_core::Release;

    use crate::node::SourceKind;

    use super::*;

    fn release(distro: &str, word: &str) -> Release {
        distribution(distro).unwrap().find(word).unwrap().clone()
    }

    fn node(
        name: &str,
        release: Release,
        provides: &[&str],
        requires: &[&str],
    ) -> Arc<PackageNode> {
        PackageNode::new(
            name,
            release,
            SourceKind::Debian,
            format!("/src/{name}"),
            None,
            1,
            provides.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            requires.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        )
    }

    #[test]
    fn test_provides_requires_wiring() {
        let bookworm = release("debian", "bookworm");
        let a = node("a", bookworm.clone(), &["liba"], &[]);
        let b = node("b", bookworm.clone(), &["libb"], &["liba"]);
        let c = node("c", bookworm, &["libc"], &["liba", "libb", "libzz-external"]);

        link(&[a.clone(), b.clone(), c.clone()]).unwrap();

        assert!(a.depends_on().is_empty());
        assert_eq!(b.depends_on().len(), 1);
        assert!(Arc::ptr_eq(&b.depends_on()[0], &a));

        let c_deps = c.depends_on();
        assert_eq!(c_deps.len(), 2, "unmatched requirements are not linked");
        assert!(c_deps.iter().any(|d| Arc::ptr_eq(d, &a)));
        assert!(c_deps.iter().any(|d| Arc::ptr_eq(d, &b)));
    }

    #[test]
    fn test_releases_partition_the_provider_map() {
        let bookworm = release("debian", "bookworm");
        let bullseye = release("debian", "bullseye");
        let provider = node("a", bookworm.clone(), &["liba"], &[]);
        let consumer = node("b", bullseye, &[], &["liba"]);

        link(&[provider, consumer.clone()]).unwrap();
        assert!(
            consumer.depends_on().is_empty(),
            "providers on another release must not match"
        );
    }

    #[test]
    fn test_duplicate_provider_is_config_error() {
        let bookworm = release("debian", "bookworm");
        let a = node("a", bookworm.clone(), &["libx"], &[]);
        let b = node("b", bookworm, &["libx"], &[]);

        let err = link(&[a, b]).unwrap_err();
        match err {
            Error::DuplicateProvider { binary, first, second, .. } => {
                assert_eq!(binary, "libx");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_dropped() {
        let bookworm = release("debian", "bookworm");
        let a = node("a", bookworm, &["liba", "liba-dev"], &["liba-dev"]);
        link(&[a.clone()]).unwrap();
        assert!(a.depends_on().is_empty());
        assert!(a.is_ready());
    }

    #[test]
    fn test_closure_is_transitive_and_includes_self() {
        let f38 = release("fedora", "38");
        let a = node("a", f38.clone(), &["liba"], &[]);
        let b = node("b", f38.clone(), &["libb"], &["liba"]);
        let c = node("c", f38.clone(), &["libc"], &["liba"]);
        let d = node("d", f38, &["libd"], &["libb", "libc"]);

        link(&[a.clone(), b.clone(), c.clone(), d.clone()]).unwrap();

        let closure_d = closure(&d);
        assert_eq!(closure_d.len(), 4);
        for expected in [&a, &b, &c, &d] {
            assert!(closure_d.iter().any(|n| Arc::ptr_eq(n, expected)));
        }

        let closure_b = closure(&b);
        assert_eq!(closure_b.len(), 2);
    }
}
