//! Start/attach state machine tests against a fake `code-server`.

mod support;

use std::sync::Arc;
use std::time::Duration;

use devtools_vscode::config::{Mode, Timings, VsCodeOptions};
use devtools_vscode::host::{HookRegistry, TabView};
use devtools_vscode::util::process::CommandSpec;
use devtools_vscode::{LaunchError, Phase};
use support::{FakeSpawner, build_launcher, fast_timings, test_options};

#[tokio::test]
async fn test_launch_scenario_default_config() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let options = test_options();
    let preferred = options.port;
    let launcher = build_launcher(options, &registry, &spawner, fast_timings()).attach();

    // Idle: launch button, not pending.
    let tabs = registry.custom_tabs();
    assert_eq!(tabs.len(), 1);
    let action = &tabs[0].view.actions()[0];
    assert_eq!(action.label, "Launch");
    assert!(!action.pending);

    // Click: pending right away, before anything has been awaited.
    let task = action.handle.invoke();
    let view = launcher.describe_status();
    assert_eq!(view.actions()[0].label, "Starting...");
    assert!(view.actions()[0].pending);
    assert_eq!(launcher.phase(), Phase::Starting);

    task.await.expect("start should succeed");

    assert_eq!(launcher.phase(), Phase::Ready);
    match launcher.describe_status() {
        TabView::Iframe { src } => {
            assert!(src.starts_with(&format!("http://localhost:{preferred}/")));
            assert!(src.contains("folder=%2Fhome%2Fu%2Fproj"));
        }
        TabView::Launch(_) => panic!("expected iframe after start"),
    }
    assert_eq!(launcher.port(), preferred);
    assert_eq!(spawner.spawn_count(), 1);

    let cmd = spawner.commands.lock().expect("lock")[0].clone();
    assert_eq!(cmd.program, "code-server");
    assert_eq!(
        cmd.args,
        vec![
            "serve-local".to_owned(),
            "--accept-server-license-terms".to_owned(),
            "--without-connection-token".to_owned(),
            format!("--port={preferred}"),
        ]
    );
}

#[tokio::test]
async fn test_repeated_ensure_started_spawns_once() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let launcher = build_launcher(test_options(), &registry, &spawner, fast_timings());

    let tasks: Vec<_> = (0..8).map(|_| launcher.ensure_started()).collect();
    for outcome in futures::future::join_all(tasks).await {
        outcome.expect("every caller sees success");
    }

    // And after completion too.
    launcher.ensure_started().await.expect("same task");
    assert_eq!(spawner.spawn_count(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_from_tasks_spawn_once() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let launcher = build_launcher(test_options(), &registry, &spawner, fast_timings());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let l = launcher.clone();
            tokio::spawn(async move { l.ensure_started().await })
        })
        .collect();
    for h in handles {
        h.await.expect("join").expect("start");
    }
    assert_eq!(spawner.spawn_count(), 1);
}

#[tokio::test]
async fn test_reuse_existing_server_skips_spawn() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();

    let existing = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let port = existing.local_addr().expect("addr").port();
    let options = VsCodeOptions {
        port,
        reuse_existing_server: true,
        ..VsCodeOptions::default()
    };
    let launcher = build_launcher(options, &registry, &spawner, fast_timings());

    launcher.ensure_started().await.expect("reuse");

    assert_eq!(spawner.spawn_count(), 0);
    assert!(launcher.is_loaded());
    let url = launcher.url().expect("url once loaded");
    assert!(url.starts_with(&format!("http://localhost:{port}/?folder=")));
    drop(existing);
}

#[tokio::test]
async fn test_busy_port_without_reuse_allocates_another() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();

    let busy = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let busy_port = busy.local_addr().expect("addr").port();
    let options = VsCodeOptions {
        port: busy_port,
        ..VsCodeOptions::default()
    };
    let launcher = build_launcher(options, &registry, &spawner, fast_timings());

    launcher.ensure_started().await.expect("start on fallback port");

    assert_eq!(spawner.spawn_count(), 1);
    assert_ne!(launcher.port(), busy_port);
    let url = launcher.url().expect("url");
    assert!(url.contains(&format!(":{}/", launcher.port())));
}

#[tokio::test]
async fn test_reachability_timeout_is_permanent() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::silent();
    let timings = Timings {
        wait_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        settle_delay: Duration::ZERO,
    };
    let launcher = build_launcher(test_options(), &registry, &spawner, timings);

    let err = launcher.ensure_started().await.expect_err("start should fail");
    assert!(matches!(*err, LaunchError::ReachabilityTimeout { .. }));

    assert!(!launcher.is_loaded());
    assert!(launcher.url().is_none());
    assert_eq!(launcher.phase(), Phase::Failed);
    assert!(launcher.failure().is_some());

    // No re-arm: the same failure, no second process.
    let again = launcher.ensure_started().await.expect_err("start should fail");
    assert!(Arc::ptr_eq(&err, &again));
    assert_eq!(spawner.spawn_count(), 1);

    // The UI still shows the in-flight button, never an iframe.
    let view = launcher.describe_status();
    assert!(matches!(view, TabView::Launch(_)));
    assert!(view.actions()[0].pending);
}

#[tokio::test]
async fn test_not_installed_never_offers_launch() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let launcher = devtools_vscode::Launcher::builder(test_options(), registry.clone())
        .installed(false)
        .spawner(spawner.clone())
        .timings(fast_timings())
        .build()
        .attach();

    assert_eq!(launcher.phase(), Phase::NotInstalled);
    let tabs = registry.custom_tabs();
    assert!(tabs[0].view.actions().is_empty());

    // Even a programmatic start does not make the view offer a button.
    let _ = launcher.ensure_started().await;
    assert!(launcher.describe_status().actions().is_empty());
    assert_eq!(launcher.phase(), Phase::NotInstalled);
}

#[tokio::test]
async fn test_start_on_boot_and_click_share_one_task() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let options = VsCodeOptions {
        start_on_boot: true,
        ..test_options()
    };
    let launcher = build_launcher(options, &registry, &spawner, fast_timings()).attach();

    assert_eq!(launcher.phase(), Phase::Starting);
    let tabs = registry.custom_tabs();
    let action = &tabs[0].view.actions()[0];
    assert!(action.pending);

    action.handle.invoke().await.expect("start");
    assert_eq!(spawner.spawn_count(), 1);
    assert_eq!(launcher.phase(), Phase::Ready);
}

#[tokio::test]
async fn test_start_on_boot_progresses_without_awaiting() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let options = VsCodeOptions {
        start_on_boot: true,
        ..test_options()
    };
    let launcher = build_launcher(options, &registry, &spawner, fast_timings()).attach();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !launcher.is_loaded() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("background start should finish");
}

#[tokio::test]
async fn test_host_close_kills_server() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let launcher = build_launcher(test_options(), &registry, &spawner, fast_timings());

    launcher.ensure_started().await.expect("start");
    assert_eq!(spawner.kill_count(), 0);

    registry.close();
    assert_eq!(spawner.kill_count(), 1);
}

#[tokio::test]
async fn test_no_iframe_while_starting() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::serving();
    let timings = Timings {
        settle_delay: Duration::from_millis(300),
        ..fast_timings()
    };
    let launcher = build_launcher(test_options(), &registry, &spawner, timings);

    let task = launcher.ensure_started();
    // Poll the view while the task runs; an iframe or URL implies loaded.
    let watcher = async {
        loop {
            let view = launcher.describe_status();
            let url = launcher.url();
            if matches!(view, TabView::Iframe { .. }) || url.is_some() {
                assert!(launcher.is_loaded(), "URL exposed before loaded");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let (outcome, ()) = tokio::join!(task, watcher);
    outcome.expect("start");
}

#[tokio::test]
async fn test_tunnel_mode_spawns_named_tunnel_and_waits_on_vscode_dev() {
    let registry = Arc::new(HookRegistry::new());
    let spawner = FakeSpawner::silent();
    let options = VsCodeOptions {
        mode: Mode::Tunnel,
        ..test_options()
    };
    // Far shorter than any round trip to vscode.dev, so the wait always
    // times out whether or not the network is reachable.
    let timings = Timings {
        wait_timeout: Duration::from_millis(1),
        ..fast_timings()
    };
    let launcher = build_launcher(options, &registry, &spawner, timings).attach();

    let err = launcher.ensure_started().await.expect_err("tunnel never becomes reachable");

    let cwd = std::env::current_dir().expect("cwd");
    let expected_url = format!("https://vscode.dev/tunnel/devlocal{}", cwd.display());
    match &*err {
        LaunchError::ReachabilityTimeout { resources, .. } => {
            assert_eq!(resources, &vec![expected_url]);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(spawner.spawn_count(), 1);
    let commands = spawner.commands.lock().expect("commands lock").clone();
    assert_eq!(
        commands,
        vec![
            CommandSpec::new(
                "code",
                ["tunnel", "--accept-server-license-terms", "--name", "devlocal"],
            )
            .streamed()
        ]
    );
    assert!(commands[0].stream_output);
    assert_eq!(launcher.phase(), Phase::Failed);
    assert!(launcher.url().is_none());

    registry.close();
    assert_eq!(spawner.kill_count(), 1);
}
