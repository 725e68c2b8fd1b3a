//! Scoped launch of external commands
//!
//! All external tools (packaging toolchain, container engine, signer) go
//! through [`Runner`]. Children are registered on the cancellation bus while
//! they run, output is captured or inherited per mode, and a non-zero exit
//! becomes [`Error::Subprocess`] carrying whatever was captured.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use pdibuild_core::{Error, Result};

use crate::cancel::CancelToken;

/// How the child's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Let stdout and stderr flow to the terminal
    Inherit,
    /// Capture stdout and stderr into one buffer, only surfaced on failure
    Capture,
    /// Capture and return stdout with stderr merged into it
    CaptureStdout,
}

/// Launches external commands under a cancellation token.
#[derive(Debug, Clone)]
pub struct Runner {
    token: CancelToken,
    verbose: bool,
}

impl Runner {
    /// Create a runner; `verbose` selects inherited over captured output
    pub fn new(token: CancelToken, verbose: bool) -> Self {
        Self { token, verbose }
    }

    /// The cancellation token this runner observes
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether child output is inherited
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Run a tool to completion, inheriting output in verbose mode
    pub async fn run(&self, argv: &[String], cwd: Option<&Path>) -> Result<()> {
        let mode = if self.verbose { OutputMode::Inherit } else { OutputMode::Capture };
        run_command(argv, cwd, mode, &self.token).await?;
        Ok(())
    }

    /// Run a tool and return its output for parsing
    pub async fn run_stdout(&self, argv: &[String], cwd: Option<&Path>) -> Result<String> {
        let output = run_command(argv, cwd, OutputMode::CaptureStdout, &self.token).await?;
        Ok(output.unwrap_or_default())
    }
}

/// Launch `argv` and wait for it.
///
/// Checks the token immediately before spawn and immediately after reap, so
/// a SIGTERM delivered by [`CancelToken::request_cancel`] surfaces as
/// [`Error::Cancelled`] rather than as a tool failure. The child stays
/// registered on the bus for exactly as long as it is alive; if waiting on
/// it fails the child is hard-killed on drop.
pub async fn run_command(
    argv: &[String],
    cwd: Option<&Path>,
    mode: OutputMode,
    token: &CancelToken,
) -> Result<Option<String>> {
    token.check()?;

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::config("empty command line"))?;

    debug!(command = %argv.join(" "), "spawning");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    match mode {
        OutputMode::Inherit => {
            cmd.stdin(Stdio::inherit());
        }
        OutputMode::Capture | OutputMode::CaptureStdout => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
    }

    let child = cmd.spawn().map_err(|e| {
        Error::subprocess(argv.to_vec(), -1, format!("failed to execute {program}: {e}"))
    })?;

    let _guard = child.id().map(|pid| token.register(pid));

    let output = child.wait_with_output().await?;

    // A SIGTERM from the bus shows up here as a non-zero exit; report it as
    // cancellation, not as a tool failure.
    token.check()?;

    let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
    captured.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(Error::subprocess(argv.to_vec(), code, captured));
    }

    match mode {
        OutputMode::Inherit | OutputMode::Capture => Ok(None),
        OutputMode::CaptureStdout => Ok(Some(captured)),
    }
}

/// Build an argv vector from anything string-like.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_stdout() {
        let token = CancelToken::new();
        let out = run_command(
            &argv(["echo", "hello"]),
            None,
            OutputMode::CaptureStdout,
            &token,
        )
        .await
        .unwrap();
        assert_eq!(out.unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn test_quiet_mode_returns_unit() {
        let token = CancelToken::new();
        let out = run_command(&argv(["true"]), None, OutputMode::Capture, &token)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_output() {
        let token = CancelToken::new();
        let err = run_command(
            &argv(["sh", "-c", "echo boom >&2; exit 3"]),
            None,
            OutputMode::Capture,
            &token,
        )
        .await
        .unwrap_err();
        match err {
            Error::Subprocess { code, output, argv } => {
                assert_eq!(code, 3);
                assert!(output.contains("boom"));
                assert_eq!(argv[0], "sh");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let token = CancelToken::new();
        token.request_cancel();
        let err = run_command(&argv(["true"]), None, OutputMode::Capture, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_sigterm_surfaces_as_cancelled() {
        let token = CancelToken::new();
        let sleeper = tokio::spawn({
            let token = token.clone();
            async move {
                run_command(&argv(["sleep", "30"]), None, OutputMode::Capture, &token).await
            }
        });

        // Give the child a moment to spawn and register
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        token.request_cancel();

        let err = sleeper.await.unwrap().unwrap_err();
        assert!(err.is_cancelled(), "got {err}");
    }

    #[tokio::test]
    async fn test_missing_program_is_subprocess_failure() {
        let token = CancelToken::new();
        let err = run_command(
            &argv(["definitely-not-a-real-tool-4711"]),
            None,
            OutputMode::Capture,
            &token,
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_runner_cwd() {
        let token = CancelToken::new();
        let runner = Runner::new(token, false);
        let out = runner
            .run_stdout(&argv(["pwd"]), Some(Path::new("/tmp")))
            .await
            .unwrap();
        assert!(out.trim_end().ends_with("tmp"));
    }
}
