//! HTTP reachability polling.
//!
//! A resource counts as reachable when a GET (following redirects) answers
//! with a 2xx status. Connection errors and non-2xx statuses are both
//! "not reachable".

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{LaunchError, LaunchResult};

/// Cap on a single probe so one hung request cannot eat the whole budget.
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// URLs that must all reach the awaited state.
    pub resources: Vec<String>,
    /// Overall bound; exceeding it fails the wait.
    pub timeout: Duration,
    /// Delay between polling rounds.
    pub interval: Duration,
    /// Wait until the resources are NOT reachable instead.
    pub reverse: bool,
}

impl WaitOptions {
    pub fn new(resource: impl Into<String>, timeout: Duration, interval: Duration) -> Self {
        Self {
            resources: vec![resource.into()],
            timeout,
            interval,
            reverse: false,
        }
    }
}

/// Block until every resource is reachable (or, with `reverse`, until none
/// is), polling every `interval`.
///
/// # Errors
///
/// Returns [`LaunchError::ReachabilityTimeout`] once `timeout` elapses, or
/// [`LaunchError::HttpClient`] if the probe client cannot be built.
pub async fn wait_on(opts: &WaitOptions) -> LaunchResult<()> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(opts.interval.max(Duration::from_millis(500)).min(MAX_PROBE_TIMEOUT))
        .build()?;

    let poll = async {
        let mut round = 0u32;
        loop {
            let mut settled = true;
            for url in &opts.resources {
                let reachable = probe(&client, url).await;
                trace!(url = %url, reachable, round, "reachability probe");
                if reachable == opts.reverse {
                    settled = false;
                    break;
                }
            }
            if settled {
                debug!(resources = ?opts.resources, reverse = opts.reverse, round, "wait satisfied");
                return;
            }
            round += 1;
            tokio::time::sleep(opts.interval).await;
        }
    };

    tokio::time::timeout(opts.timeout, poll)
        .await
        .map_err(|_| LaunchError::ReachabilityTimeout {
            resources: opts.resources.clone(),
            timeout: opts.timeout,
        })
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP responder answering every request with `200 OK`.
    async fn serve_ok() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });
        port
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[tokio::test]
    async fn test_reachable_resource() {
        let port = serve_ok().await;
        let opts = WaitOptions::new(
            format!("http://127.0.0.1:{port}/"),
            Duration::from_secs(5),
            Duration::from_millis(50),
        );
        wait_on(&opts).await.expect("should become reachable");
    }

    #[tokio::test]
    async fn test_unreachable_resource_times_out() {
        let url = format!("http://127.0.0.1:{}/", closed_port());
        let opts = WaitOptions::new(url.clone(), Duration::from_millis(300), Duration::from_millis(50));

        let err = wait_on(&opts).await.expect_err("should time out");
        match err {
            LaunchError::ReachabilityTimeout { resources, .. } => assert_eq!(resources, vec![url]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_reverse_waits_for_unreachable() {
        let mut opts = WaitOptions::new(
            format!("http://127.0.0.1:{}/", closed_port()),
            Duration::from_secs(2),
            Duration::from_millis(50),
        );
        opts.reverse = true;
        wait_on(&opts).await.expect("closed port is already unreachable");
    }

    #[tokio::test]
    async fn test_reverse_times_out_while_reachable() {
        let port = serve_ok().await;
        let mut opts = WaitOptions::new(
            format!("http://127.0.0.1:{port}/"),
            Duration::from_millis(300),
            Duration::from_millis(50),
        );
        opts.reverse = true;
        assert!(wait_on(&opts).await.is_err());
    }
}
