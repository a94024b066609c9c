//! devtools-vscode -- VS Code Server integration as a devtools sidecar.
//!
//! Usage: devtools-vscode [--root <path>] [--config <options.json>]

use anyhow::Context;
use devtools_vscode::config::VsCodeOptions;
use devtools_vscode::server::{HostServerConfig, run_host_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the host protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let root = flag_value("--root").unwrap_or_else(|| ".".to_string());
    let root_dir = std::path::Path::new(&root)
        .canonicalize()
        .with_context(|| format!("invalid --root {root}"))?;

    let options = match flag_value("--config") {
        Some(path) => VsCodeOptions::from_file(std::path::Path::new(&path))?,
        None => VsCodeOptions::default(),
    };

    run_host_server(HostServerConfig { root_dir, options }).await
}

fn flag_value(flag: &str) -> Option<String> {
    std::env::args().skip_while(|a| a != flag).nth(1)
}
