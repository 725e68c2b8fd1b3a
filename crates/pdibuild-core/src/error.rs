//! Shared error type for pdibuild operations

use thiserror::Error;

/// Error type shared by every pdibuild crate
#[derive(Error, Debug)]
pub enum Error {
    /// Cooperative shutdown in progress; never reported to the user
    #[error("operation cancelled")]
    Cancelled,

    /// A child tool exited non-zero
    #[error("subprocess {argv:?} failed with exit code {code}")]
    Subprocess {
        argv: Vec<String>,
        code: i32,
        output: String,
    },

    /// Malformed configuration, unknown distribution, unsupported source format
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Two packages in the same release claim the same binary name
    #[error(
        "packages {first} and {second} both provide binary {binary} on {release}"
    )]
    DuplicateProvider {
        binary: String,
        release: String,
        first: String,
        second: String,
    },

    /// Network retries exhausted
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// Scheduler invariant violation: waiting nodes but nothing in flight
    #[error("dependency graph deadlocked; unbuildable packages: {}", remaining.join(", "))]
    DeadlockedGraph { remaining: Vec<String> },

    /// Signing environment setup or signing invocation failed
    #[error("gpg error: {reason}")]
    Gpg { reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pdibuild operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download { url: url.into(), reason: reason.into() }
    }

    /// Create a gpg error
    pub fn gpg(reason: impl Into<String>) -> Self {
        Self::Gpg { reason: reason.into() }
    }

    /// Create a subprocess failure carrying the captured output
    pub fn subprocess(argv: Vec<String>, code: i32, output: impl Into<String>) -> Self {
        Self::Subprocess { argv, code, output: output.into() }
    }

    /// Check if an error is the cooperative-shutdown marker
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Process exit code mandated for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 1,
            Self::Subprocess { .. } => 2,
            _ => 3,
        }
    }
}
