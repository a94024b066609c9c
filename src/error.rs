//! Error types for the devtools-vscode crate.

use std::path::PathBuf;
use std::time::Duration;

/// Launcher error types.
///
/// A missing editor binary is deliberately absent: it is a state
/// (`installed == false`), not a failure.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Neither the preferred port nor an ephemeral one could be bound.
    #[error("no free port available (preferred {preferred}): {source}")]
    PortUnavailable {
        preferred: u16,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to launch the subprocess.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The server never became reachable within the wait bound.
    #[error("timed out after {timeout:?} waiting for {}", .resources.join(", "))]
    ReachabilityTimeout {
        resources: Vec<String>,
        timeout: Duration,
    },

    /// Working directory lookup failed (tunnel mode).
    #[error("cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    /// HTTP client for reachability probes could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Options file could not be read or parsed.
    #[error("invalid options in {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

/// Convenience result type for launcher operations.
pub type LaunchResult<T> = Result<T, LaunchError>;
