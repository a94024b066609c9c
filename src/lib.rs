//! `devtools-vscode`: VS Code Server as an embedded devtools tab.
//!
//! Detects `code-server` (or the `code` CLI in tunnel mode), starts it or
//! adopts one that is already running, waits until it answers, and hands
//! the host UI a tab descriptor: install instructions, a launch button, or
//! an iframe pointing at the live server.
//!
//! # Architecture
//!
//! ```text
//! host (Hooks) ──tabs──▶ Launcher::describe_status ──▶ TabView
//!      │                      ▲
//!      └──action──────────────┴─ Launcher::ensure_started (one shared task)
//!                                    ├─ util::port     (allocate / probe)
//!                                    ├─ util::process  (spawn, kill on close)
//!                                    └─ util::wait     (HTTP reachability)
//! ```
//!
//! [`server`] exposes the same surface over stdio JSON-RPC for hosts that
//! are not Rust.

pub mod config;
pub mod error;
pub mod host;
pub mod launcher;
pub mod server;
pub mod util;

pub use error::{LaunchError, LaunchResult};
pub use launcher::{Launcher, Phase, StartTask, setup};
pub use server::run_host_server;
