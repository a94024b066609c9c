//! Subprocess execution for the editor server.
//!
//! The launcher only needs to start a long-running command and later kill
//! it, so the [`Spawner`] seam is that narrow. [`SystemSpawner`] is the
//! real implementation; tests substitute their own.

use std::process::Stdio;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{LaunchError, LaunchResult};

/// A command line to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Forward the child's stdout and stderr to this process's stderr.
    /// Otherwise the child's output is discarded.
    pub stream_output: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stream_output: false,
        }
    }

    #[must_use]
    pub fn streamed(mut self) -> Self {
        self.stream_output = true;
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle to a spawned server process.
pub trait ServerProcess: Send {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;
    /// Ask the process to terminate. Must not block.
    fn kill(&mut self);
}

/// Launches server processes.
pub trait Spawner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LaunchError::Spawn`] if the OS cannot start the command.
    fn spawn(&self, cmd: &CommandSpec) -> LaunchResult<Box<dyn ServerProcess>>;
}

/// Spawns real OS processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, cmd: &CommandSpec) -> LaunchResult<Box<dyn ServerProcess>> {
        let output = || if cmd.stream_output { Stdio::piped() } else { Stdio::null() };

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: cmd.display(),
                source,
            })?;

        if let Some(out) = child.stdout.take() {
            forward_to_stderr(out, "stdout");
        }
        if let Some(err) = child.stderr.take() {
            forward_to_stderr(err, "stderr");
        }

        info!(command = %cmd.display(), pid = ?child.id(), "spawned server process");
        Ok(Box::new(ChildProcess { child }))
    }
}

/// Copy a child stream onto our stderr. Stdout is reserved for the host
/// protocol, so child stdout goes to stderr as well.
fn forward_to_stderr<R>(mut stream: R, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = tokio::io::stderr();
        if let Err(e) = tokio::io::copy(&mut stream, &mut sink).await {
            debug!(stream = name, error = %e, "stopped forwarding child output");
        }
    });
}

struct ChildProcess {
    child: Child,
}

impl ServerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) {
        match self.child.start_kill() {
            Ok(()) => info!(pid = ?self.child.id(), "server process killed"),
            Err(e) => warn!(error = %e, "failed to kill server process"),
        }
    }
}
