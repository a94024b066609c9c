//! Shared fixtures: a fake spawner that stands in for `code-server`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devtools_vscode::config::{Timings, VsCodeOptions};
use devtools_vscode::host::HookRegistry;
use devtools_vscode::util::process::{CommandSpec, ServerProcess, Spawner};
use devtools_vscode::{LaunchResult, Launcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Records spawns and, when `serve` is set, answers HTTP 200 on the
/// `--port=N` the launcher passes.
#[derive(Default)]
pub struct FakeSpawner {
    pub serve: bool,
    pub spawned: AtomicUsize,
    pub killed: Arc<AtomicUsize>,
    pub commands: Mutex<Vec<CommandSpec>>,
}

impl FakeSpawner {
    pub fn serving() -> Arc<Self> {
        Arc::new(Self {
            serve: true,
            ..Self::default()
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, cmd: &CommandSpec) -> LaunchResult<Box<dyn ServerProcess>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().expect("commands lock").push(cmd.clone());

        let server = if self.serve {
            let port = cmd
                .args
                .iter()
                .find_map(|a| a.strip_prefix("--port="))
                .and_then(|p| p.parse::<u16>().ok())
                .expect("fake server needs --port=N");
            Some(serve_ok(port))
        } else {
            None
        };

        Ok(Box::new(FakeProcess {
            server,
            killed: self.killed.clone(),
        }))
    }
}

struct FakeProcess {
    server: Option<JoinHandle<()>>,
    killed: Arc<AtomicUsize>,
}

impl ServerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn kill(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self.killed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Answer every request on `port` with `200 OK`.
pub fn serve_ok(port: u16) -> JoinHandle<()> {
    let std_listener = std::net::TcpListener::bind(("127.0.0.1", port)).expect("bind fake server");
    std_listener.set_nonblocking(true).expect("nonblocking");
    let listener = tokio::net::TcpListener::from_std(std_listener).expect("tokio listener");

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    })
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    listener.local_addr().expect("addr").port()
}

pub fn fast_timings() -> Timings {
    Timings {
        wait_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        settle_delay: Duration::from_millis(50),
    }
}

/// Options on a random free preferred port so tests never collide on 3080.
pub fn test_options() -> VsCodeOptions {
    VsCodeOptions {
        port: free_port(),
        ..VsCodeOptions::default()
    }
}

pub fn build_launcher(
    options: VsCodeOptions,
    registry: &Arc<HookRegistry>,
    spawner: &Arc<FakeSpawner>,
    timings: Timings,
) -> Launcher {
    Launcher::builder(options, registry.clone())
        .root_dir(PathBuf::from("/home/u/proj"))
        .installed(true)
        .hostname("dev.local")
        .timings(timings)
        .spawner(spawner.clone())
        .build()
}
