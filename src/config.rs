//! Integration options and launch timings.
//!
//! Options are read once at setup and never change afterwards. They use the
//! same camelCase JSON shape the devtools host writes into its config:
//!
//! ```json
//! { "port": 3080, "mode": "tunnel", "reuseExistingServer": true,
//!   "startOnBoot": false, "tunnel": { "name": "my-box" } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Default port for `code-server serve-local`.
pub const DEFAULT_PORT: u16 = 3080;

/// How the editor is made available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Run `code-server serve-local` on a local port.
    #[default]
    LocalServe,
    /// Run `code tunnel` and embed the vscode.dev tunnel page.
    Tunnel,
}

impl Mode {
    /// Executable this mode spawns, and therefore the one probed on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            Self::LocalServe => "code-server",
            Self::Tunnel => "code",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelOptions {
    /// Tunnel name; defaults to the machine hostname without dots.
    #[serde(default)]
    pub name: Option<String>,
}

/// User-facing integration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsCodeOptions {
    /// Preferred local port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub mode: Mode,
    /// Adopt a server already listening on `port` instead of spawning one.
    #[serde(default)]
    pub reuse_existing_server: bool,
    /// Start as soon as the integration is set up.
    #[serde(default)]
    pub start_on_boot: bool,
    #[serde(default)]
    pub tunnel: TunnelOptions,
}

const fn default_port() -> u16 { DEFAULT_PORT }

impl Default for VsCodeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mode: Mode::default(),
            reuse_existing_server: false,
            start_on_boot: false,
            tunnel: TunnelOptions::default(),
        }
    }
}

impl VsCodeOptions {
    /// Load options from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Config`] if the file cannot be read or is not
    /// a valid options object.
    pub fn from_file(path: &Path) -> LaunchResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| LaunchError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| LaunchError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Bounds for the start sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound on waiting for the server URL to answer.
    pub wait_timeout: Duration,
    /// Delay between reachability probes.
    pub poll_interval: Duration,
    /// Pause after the first successful probe so the server can finish
    /// initializing before the iframe loads it.
    pub settle_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(2),
        }
    }
}
