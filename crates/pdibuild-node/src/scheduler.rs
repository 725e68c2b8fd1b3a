//! Ready-set parallel executor over the dependency DAG
//!
//! Nodes are submitted as soon as every direct dependency has finished or
//! been skipped; a semaphore bounds how many build at once. The first
//! failure trips the cancellation bus; everything already in flight drains
//! out (observing `Cancelled` at its next check) before the failure is
//! returned.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use pdibuild_core::{Error, Result};
use pdibuild_exec::CancelToken;

use crate::node::{NodeState, PackageNode};

/// Drive every node to completion with at most `jobs` concurrent builds.
///
/// `build` runs one node's pipeline; injecting it keeps the ordering and
/// cancellation discipline testable without containers. The default closure
/// is [`PackageNode::build`] over a shared [`crate::BuildEnv`].
pub async fn run<F, Fut>(
    nodes: Vec<Arc<PackageNode>>,
    jobs: usize,
    token: CancelToken,
    build: F,
) -> Result<()>
where
    F: Fn(Arc<PackageNode>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut waiting = nodes;
    let mut in_progress: JoinSet<(Arc<PackageNode>, Result<()>)> = JoinSet::new();
    let mut first_error: Option<Error> = None;

    loop {
        if first_error.is_none() {
            let mut still_waiting = Vec::with_capacity(waiting.len());
            for node in waiting {
                if node.is_ready() {
                    debug!(package = %node.name, release = %node.release.uid(), "submitting build");
                    node.set_state(NodeState::Building);
                    let semaphore = Arc::clone(&semaphore);
                    let build = build.clone();
                    in_progress.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .expect("scheduler semaphore is never closed");
                        let result = build(Arc::clone(&node)).await;
                        (node, result)
                    });
                } else {
                    still_waiting.push(node);
                }
            }
            waiting = still_waiting;

            if in_progress.is_empty() {
                if waiting.is_empty() {
                    return Ok(());
                }
                let remaining = waiting.iter().map(|n| n.name.clone()).collect();
                return Err(Error::DeadlockedGraph { remaining });
            }
        } else if in_progress.is_empty() {
            // drained; report the failure that started the shutdown
            return Err(first_error.take().expect("first_error is set"));
        }

        match in_progress.join_next().await {
            Some(Ok((node, Ok(())))) => {
                debug!(package = %node.name, state = ?node.state(), "build completed");
            }
            Some(Ok((node, Err(error)))) => {
                if error.is_cancelled() {
                    node.set_state(NodeState::Cancelled);
                } else {
                    node.set_state(NodeState::Failed);
                    warn!(package = %node.name, %error, "build failed");
                }
                if first_error.is_none() {
                    token.request_cancel();
                    first_error = Some(error);
                }
            }
            Some(Err(join_error)) => {
                if first_error.is_none() {
                    token.request_cancel();
                    first_error =
                        Some(Error::config(format!("build task aborted: {join_error}")));
                }
            }
            None => unreachable!("join_next on a non-empty set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use pdibuild_core::release::distribution;
    use pdibuild_core::Release;

    use crate::linker;
    use crate::node::SourceKind;

    use super::*;

    fn f38() -> Release {
        distribution("fedora").unwrap().find("38").unwrap().clone()
    }

    fn node(name: &str, provides: &[&str], requires: &[&str]) -> Arc<PackageNode> {
        PackageNode::new(
            name,
            f38(),
            SourceKind::Rpm,
            format!("/src/{name}"),
            None,
            1,
            provides.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            requires.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        )
    }

    /// Records (name, begin, end) per build for ordering assertions.
    type Spans = Arc<Mutex<Vec<(String, Instant, Instant)>>>;

    fn recording_build(
        spans: Spans,
        token: CancelToken,
    ) -> impl Fn(Arc<PackageNode>) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>
           + Clone
           + Send
           + 'static {
        move |node: Arc<PackageNode>| {
            let spans = Arc::clone(&spans);
            let token = token.clone();
            Box::pin(async move {
                token.check()?;
                let begin = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                token.check()?;
                node.set_state(NodeState::Finished);
                spans.lock().unwrap().push((node.name.clone(), begin, Instant::now()));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_diamond_respects_dependencies() {
        let a = node("a", &["liba"], &[]);
        let b = node("b", &["libb"], &["liba"]);
        let c = node("c", &["libc"], &["liba"]);
        let d = node("d", &["libd"], &["libb", "libc"]);
        let nodes = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        linker::link(&nodes).unwrap();

        let spans: Spans = Arc::new(Mutex::new(Vec::new()));
        let token = CancelToken::new();
        run(nodes, 4, token.clone(), recording_build(Arc::clone(&spans), token))
            .await
            .unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 4);
        let span = |name: &str| {
            spans
                .iter()
                .find(|(n, _, _)| n == name)
                .cloned()
                .unwrap_or_else(|| panic!("{name} never built"))
        };

        let (_, a_begin, a_end) = span("a");
        let (_, b_begin, _) = span("b");
        let (_, c_begin, _) = span("c");
        let (_, d_begin, _) = span("d");

        assert!(b_begin >= a_end, "b began before a ended");
        assert!(c_begin >= a_end, "c began before a ended");
        assert!(d_begin >= span("b").2, "d began before b ended");
        assert!(d_begin >= span("c").2, "d began before c ended");
        assert!(a_begin < d_begin);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_the_rest() {
        let nodes: Vec<Arc<PackageNode>> = (0..5)
            .map(|i| node(&format!("pkg{i}"), &[format!("lib{i}").as_str()], &[]))
            .collect();
        linker::link(&nodes).unwrap();

        let token = CancelToken::new();
        let build = {
            let token = token.clone();
            move |node: Arc<PackageNode>| {
                let token = token.clone();
                async move {
                    if node.name == "pkg2" {
                        return Err(Error::subprocess(
                            vec!["podman".into(), "run".into()],
                            1,
                            "builder exploded",
                        ));
                    }
                    // everyone else waits long enough to observe cancellation
                    for _ in 0..100 {
                        token.check()?;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    node.set_state(NodeState::Finished);
                    Ok(())
                }
            }
        };

        let err = run(nodes.clone(), 5, token.clone(), build).await.unwrap_err();
        assert_eq!(err.exit_code(), 2, "the subprocess failure is reported");
        assert!(token.is_cancelled());

        let failed: Vec<&str> = nodes
            .iter()
            .filter(|n| n.state() == NodeState::Failed)
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(failed, vec!["pkg2"]);

        let cancelled = nodes
            .iter()
            .filter(|n| n.state() == NodeState::Cancelled)
            .count();
        assert_eq!(cancelled, 4, "siblings end cancelled, not failed");
    }

    #[tokio::test]
    async fn test_unresolved_graph_deadlocks() {
        // never linked: the self-sentinel keeps it from ever becoming ready
        let orphan = node("orphan", &["lib"], &[]);

        let err = run(
            vec![orphan],
            2,
            CancelToken::new(),
            |_node: Arc<PackageNode>| async move { Ok::<(), Error>(()) },
        )
        .await
        .unwrap_err();

        match err {
            Error::DeadlockedGraph { remaining } => {
                assert_eq!(remaining, vec!["orphan".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_skipped_dependency_unblocks_dependents() {
        let ghost = node("ghost", &["libghost"], &[]);
        let consumer = node("consumer", &["libc"], &["libghost"]);
        let nodes = vec![ghost.clone(), consumer.clone()];
        linker::link(&nodes).unwrap();

        let build = |node: Arc<PackageNode>| async move {
            if node.name == "ghost" {
                node.set_state(NodeState::Skipped);
            } else {
                node.set_state(NodeState::Finished);
            }
            Ok::<(), Error>(())
        };

        run(nodes, 2, CancelToken::new(), build).await.unwrap();
        assert_eq!(ghost.state(), NodeState::Skipped);
        assert_eq!(consumer.state(), NodeState::Finished);
    }

    #[tokio::test]
    async fn test_pool_bound_is_respected() {
        let nodes: Vec<Arc<PackageNode>> = (0..6)
            .map(|i| node(&format!("pkg{i}"), &[format!("lib{i}").as_str()], &[]))
            .collect();
        linker::link(&nodes).unwrap();

        let running = Arc::new(Mutex::new((0usize, 0usize))); // (current, peak)
        let build = {
            let running = Arc::clone(&running);
            move |node: Arc<PackageNode>| {
                let running = Arc::clone(&running);
                async move {
                    {
                        let mut state = running.lock().unwrap();
                        state.0 += 1;
                        state.1 = state.1.max(state.0);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.lock().unwrap().0 -= 1;
                    node.set_state(NodeState::Finished);
                    Ok::<(), Error>(())
                }
            }
        };

        run(nodes, 2, CancelToken::new(), build).await.unwrap();
        assert!(running.lock().unwrap().1 <= 2, "more than 2 builds ran at once");
    }
}
