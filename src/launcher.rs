//! VS Code server launcher: start/attach state machine for the editor
//! server, plus the tab descriptor derived from its state.
//!
//! # Lifecycle
//!
//! ```text
//! NotInstalled                       (binary missing, terminal)
//! Idle ──ensure_started──▶ Starting ──▶ Ready    (terminal)
//!                              └──────▶ Failed   (terminal)
//! ```
//!
//! Exactly one start task exists per launcher. It is created and stored
//! under the state lock before anything is awaited, so concurrent callers
//! (a boot-time auto start racing a click in the UI) share it. A failed
//! task is never replaced: every later caller sees the same error.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::{Mode, Timings, VsCodeOptions};
use crate::error::{LaunchError, LaunchResult};
use crate::host::{ActionHandle, CustomTab, Hooks, LaunchView, TabAction, TabView};
use crate::util::port;
use crate::util::probe;
use crate::util::process::{CommandSpec, Spawner, SystemSpawner};
use crate::util::wait::{WaitOptions, wait_on};

/// Name of the tab this integration registers.
pub const TAB_NAME: &str = "builtin-vscode";
const TAB_TITLE: &str = "VS Code";
const TAB_ICON: &str = "i-bxl-visual-studio";

const TUNNEL_BASE_URL: &str = "https://vscode.dev/tunnel";

/// Outcome shared by everyone awaiting the start task.
pub type StartOutcome = Result<(), Arc<LaunchError>>;

/// The single start operation. Cloning yields another handle to the same
/// run; awaiting any clone yields the same outcome.
pub type StartTask = Shared<BoxFuture<'static, StartOutcome>>;

/// Externally observable launcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotInstalled,
    Idle,
    Starting,
    Ready,
    Failed,
}

struct State {
    port: u16,
    url: String,
    loaded: bool,
    task: Option<StartTask>,
    failure: Option<Arc<LaunchError>>,
}

struct Inner {
    options: VsCodeOptions,
    root_dir: PathBuf,
    installed: bool,
    tunnel_name: String,
    timings: Timings,
    spawner: Arc<dyn Spawner>,
    hooks: Arc<dyn Hooks>,
    state: Mutex<State>,
}

/// Handle to the launcher. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Launcher {
    inner: Arc<Inner>,
}

/// Set up the integration against `hooks`.
///
/// Probes for the binary the configured mode needs, registers the
/// `builtin-vscode` tab, and kicks off the start when `start_on_boot` is set.
pub fn setup(hooks: Arc<dyn Hooks>, options: VsCodeOptions, root_dir: PathBuf) -> Launcher {
    Launcher::builder(options, hooks)
        .root_dir(root_dir)
        .build()
        .attach()
}

impl Launcher {
    pub fn builder(options: VsCodeOptions, hooks: Arc<dyn Hooks>) -> LauncherBuilder {
        LauncherBuilder {
            options,
            hooks,
            root_dir: None,
            installed: None,
            hostname: None,
            timings: Timings::default(),
            spawner: None,
        }
    }

    /// Register the tab provider with the host and honor `start_on_boot`.
    #[must_use]
    pub fn attach(self) -> Self {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.hooks.on_custom_tabs(Box::new(move |tabs: &mut Vec<CustomTab>| {
            if let Some(inner) = weak.upgrade() {
                tabs.push(Launcher { inner }.custom_tab());
            }
        }));

        if self.inner.options.start_on_boot {
            debug!("start_on_boot set, starting immediately");
            drop(self.ensure_started());
        }
        self
    }

    /// Start the server, or return the start that is already underway (or
    /// finished).
    ///
    /// When called inside a tokio runtime the task is also spawned, so it
    /// makes progress even if nobody awaits the returned handle.
    pub fn ensure_started(&self) -> StartTask {
        let mut state = self.inner.state.lock();
        if let Some(task) = &state.task {
            return task.clone();
        }

        let inner = self.inner.clone();
        let task = async move {
            let outcome = inner.start().await.map_err(Arc::new);
            if let Err(e) = &outcome {
                error!(error = %e, "VS Code server failed to start");
                inner.state.lock().failure = Some(e.clone());
            }
            outcome
        }
        .boxed()
        .shared();

        state.task = Some(task.clone());
        drop(state);

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(task.clone());
            }
            Err(_) => debug!("no tokio runtime, start runs when awaited"),
        }
        task
    }

    /// Describe the tab body for the current state. No side effects.
    pub fn describe_status(&self) -> TabView {
        if !self.inner.installed {
            return self.install_view();
        }

        let state = self.inner.state.lock();
        if state.loaded {
            return TabView::Iframe {
                src: state.url.clone(),
            };
        }

        let pending = state.task.is_some();
        let launcher = self.clone();
        TabView::Launch(LaunchView {
            title: None,
            description: "Launch VS Code right in the devtools!".to_owned(),
            actions: vec![TabAction {
                label: (if pending { "Starting..." } else { "Launch" }).to_owned(),
                pending,
                handle: ActionHandle::new(move || launcher.ensure_started()),
            }],
        })
    }

    /// The full tab entry handed to the host.
    pub fn custom_tab(&self) -> CustomTab {
        CustomTab {
            name: TAB_NAME.to_owned(),
            title: TAB_TITLE.to_owned(),
            icon: TAB_ICON.to_owned(),
            view: self.describe_status(),
        }
    }

    fn install_view(&self) -> TabView {
        let binary = self.inner.options.mode.binary();
        TabView::Launch(LaunchView {
            title: Some("Install VS Code Server".to_owned()),
            description: format!(
                "It seems you don't have {binary} installed.\n\n\
                 Learn more about it with <a href=\"https://code.visualstudio.com/blogs/2022/07/07/vscode-server\" target=\"_blank\">this guide</a>.\n\
                 Once installed, restart the dev server and visit this tab again."
            ),
            actions: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        if !self.inner.installed {
            return Phase::NotInstalled;
        }
        let state = self.inner.state.lock();
        if state.loaded {
            Phase::Ready
        } else if state.failure.is_some() {
            Phase::Failed
        } else if state.task.is_some() {
            Phase::Starting
        } else {
            Phase::Idle
        }
    }

    pub fn is_installed(&self) -> bool {
        self.inner.installed
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.lock().loaded
    }

    /// Server URL, only once it is live.
    pub fn url(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.loaded.then(|| state.url.clone())
    }

    /// Current port: the preferred one until allocation settles it.
    pub fn port(&self) -> u16 {
        self.inner.state.lock().port
    }

    pub fn mode(&self) -> Mode {
        self.inner.options.mode
    }

    /// Error of the failed start, if it failed.
    pub fn failure(&self) -> Option<Arc<LaunchError>> {
        self.inner.state.lock().failure.clone()
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("mode", &self.inner.options.mode)
            .field("installed", &self.inner.installed)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Start strategies
// ---------------------------------------------------------------------------

impl Inner {
    async fn start(&self) -> LaunchResult<()> {
        match self.options.mode {
            Mode::LocalServe => self.start_code_server().await,
            Mode::Tunnel => self.start_code_tunnel().await,
        }
    }

    async fn start_code_server(&self) -> LaunchResult<()> {
        let preferred = self.options.port;

        if self.options.reuse_existing_server && !port::is_port_free(preferred) {
            let url = local_url(preferred, &self.root_dir);
            info!(port = preferred, url = %url, "existing VS Code server found, reusing it");
            self.mark_loaded(preferred, url);
            return Ok(());
        }

        let port = port::get_port(preferred)?;
        let url = local_url(port, &self.root_dir);
        self.set_target(port, &url);
        info!(port, url = %url, "starting VS Code server");

        let cmd = CommandSpec::new(
            Mode::LocalServe.binary(),
            [
                "serve-local".to_owned(),
                "--accept-server-license-terms".to_owned(),
                "--without-connection-token".to_owned(),
                format!("--port={port}"),
            ],
        );
        self.launch(&cmd)?;
        self.await_ready(&url).await?;

        self.mark_loaded(port, url);
        Ok(())
    }

    async fn start_code_tunnel(&self) -> LaunchResult<()> {
        let cwd = std::env::current_dir().map_err(LaunchError::CurrentDir)?;
        let url = tunnel_url(&self.tunnel_name, &cwd);
        self.set_target(self.options.port, &url);
        info!(name = self.tunnel_name, url = %url, "starting VS Code tunnel");

        let cmd = CommandSpec::new(
            Mode::Tunnel.binary(),
            [
                "tunnel",
                "--accept-server-license-terms",
                "--name",
                self.tunnel_name.as_str(),
            ],
        )
        .streamed();
        self.launch(&cmd)?;
        self.await_ready(&url).await?;

        self.mark_loaded(self.options.port, url);
        Ok(())
    }

    /// Spawn `cmd` and tie its lifetime to the host's.
    fn launch(&self, cmd: &CommandSpec) -> LaunchResult<()> {
        let mut process = self.spawner.spawn(cmd)?;
        self.hooks.on_close(Box::new(move || process.kill()));
        Ok(())
    }

    async fn await_ready(&self, url: &str) -> LaunchResult<()> {
        let opts = WaitOptions::new(url, self.timings.wait_timeout, self.timings.poll_interval);
        wait_on(&opts).await?;
        tokio::time::sleep(self.timings.settle_delay).await;
        Ok(())
    }

    fn set_target(&self, port: u16, url: &str) {
        let mut state = self.state.lock();
        state.port = port;
        url.clone_into(&mut state.url);
    }

    fn mark_loaded(&self, port: u16, url: String) {
        let mut state = self.state.lock();
        state.port = port;
        state.url = url;
        state.loaded = true;
        info!(url = %state.url, "VS Code server ready");
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// URL of a local server opening `root_dir`.
pub fn local_url(port: u16, root_dir: &Path) -> String {
    format!(
        "http://localhost:{port}/?folder={}",
        urlencoding::encode(&root_dir.to_string_lossy())
    )
}

/// Tunnel name: the configured one, else the hostname with dots removed.
pub fn tunnel_name(configured: Option<&str>, hostname: &str) -> String {
    match configured {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => hostname.replace('.', ""),
    }
}

/// Public vscode.dev URL for tunnel `name` opened at `cwd`.
pub fn tunnel_url(name: &str, cwd: &Path) -> String {
    format!("{TUNNEL_BASE_URL}/{name}{}", cwd.to_string_lossy())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Launcher`]. Anything left unset is probed from the host
/// machine at [`build`](Self::build) time.
pub struct LauncherBuilder {
    options: VsCodeOptions,
    hooks: Arc<dyn Hooks>,
    root_dir: Option<PathBuf>,
    installed: Option<bool>,
    hostname: Option<String>,
    timings: Timings,
    spawner: Option<Arc<dyn Spawner>>,
}

impl LauncherBuilder {
    /// Project directory opened by the local server.
    #[must_use]
    pub fn root_dir(mut self, root_dir: PathBuf) -> Self {
        self.root_dir = Some(root_dir);
        self
    }

    /// Skip the `PATH` probe and use this answer.
    #[must_use]
    pub fn installed(mut self, installed: bool) -> Self {
        self.installed = Some(installed);
        self
    }

    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[must_use]
    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn build(self) -> Launcher {
        let installed = self
            .installed
            .unwrap_or_else(|| probe::binary_installed(self.options.mode.binary()));
        let hostname = self.hostname.unwrap_or_else(probe::machine_hostname);
        let tunnel_name = tunnel_name(self.options.tunnel.name.as_deref(), &hostname);
        let root_dir = self
            .root_dir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let port = self.options.port;

        debug!(
            mode = ?self.options.mode,
            installed,
            port,
            root = %root_dir.display(),
            "VS Code integration configured"
        );

        Launcher {
            inner: Arc::new(Inner {
                options: self.options,
                root_dir,
                installed,
                tunnel_name,
                timings: self.timings,
                spawner: self.spawner.unwrap_or_else(|| Arc::new(SystemSpawner) as Arc<dyn Spawner>),
                hooks: self.hooks,
                state: Mutex::new(State {
                    port,
                    url: format!("http://localhost:{port}"),
                    loaded: false,
                    task: None,
                    failure: None,
                }),
            }),
        }
    }
}
