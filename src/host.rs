//! Host hook surface and the tab descriptors handed back to it.
//!
//! The launcher never talks to a concrete devtools framework. It registers
//! callbacks through [`Hooks`]; [`HookRegistry`] is the in-process
//! implementation used by the stdio bridge and by tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::launcher::StartTask;

/// Callback run once when the host shuts down.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Callback that appends this integration's tabs whenever the host renders
/// its tab list.
pub type TabsProvider = Box<dyn Fn(&mut Vec<CustomTab>) + Send + Sync>;

/// Hook registration capabilities consumed from the host.
pub trait Hooks: Send + Sync {
    fn on_close(&self, hook: CloseHook);
    fn on_custom_tabs(&self, provider: TabsProvider);
}

// ---------------------------------------------------------------------------
// Tab descriptors
// ---------------------------------------------------------------------------

/// One devtools tab.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTab {
    pub name: String,
    pub title: String,
    pub icon: String,
    pub view: TabView,
}

/// How the host should render the tab body.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TabView {
    /// A prompt with optional buttons (install instructions or launch).
    Launch(LaunchView),
    /// An embedded page.
    Iframe { src: String },
}

impl TabView {
    /// The launch view's actions; empty for iframes.
    pub fn actions(&self) -> &[TabAction] {
        match self {
            Self::Launch(view) => &view.actions,
            Self::Iframe { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub actions: Vec<TabAction>,
}

/// A button on a launch view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabAction {
    pub label: String,
    pub pending: bool,
    #[serde(skip)]
    pub handle: ActionHandle,
}

/// What happens when a [`TabAction`] is clicked.
#[derive(Clone)]
pub struct ActionHandle(Arc<dyn Fn() -> StartTask + Send + Sync>);

impl ActionHandle {
    pub fn new(f: impl Fn() -> StartTask + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self) -> StartTask {
        (self.0)()
    }
}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionHandle(..)")
    }
}

// ---------------------------------------------------------------------------
// In-process registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HookRegistry {
    close_hooks: Mutex<Vec<CloseHook>>,
    tab_providers: Mutex<Vec<TabsProvider>>,
    closed: AtomicBool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the current tab list from every provider.
    pub fn custom_tabs(&self) -> Vec<CustomTab> {
        let mut tabs = Vec::new();
        for provider in self.tab_providers.lock().iter() {
            provider(&mut tabs);
        }
        tabs
    }

    /// Look up action `index` on the tab named `name`.
    pub fn find_action(&self, name: &str, index: usize) -> Option<ActionHandle> {
        self.custom_tabs()
            .into_iter()
            .find(|t| t.name == name)
            .and_then(|t| t.view.actions().get(index).map(|a| a.handle.clone()))
    }

    /// Run all close hooks. Idempotent; hooks registered afterwards run
    /// immediately.
    pub fn close(&self) {
        let hooks = {
            let mut pending = self.close_hooks.lock();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };
        debug!(count = hooks.len(), "running close hooks");
        for hook in hooks {
            hook();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Hooks for HookRegistry {
    fn on_close(&self, hook: CloseHook) {
        // `closed` only flips while `close_hooks` is held, so a hook is
        // either stored before the drain or run here.
        let mut pending = self.close_hooks.lock();
        if self.is_closed() {
            drop(pending);
            hook();
            return;
        }
        pending.push(hook);
    }

    fn on_custom_tabs(&self, provider: TabsProvider) {
        self.tab_providers.lock().push(provider);
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("close_hooks", &self.close_hooks.lock().len())
            .field("tab_providers", &self.tab_providers.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
