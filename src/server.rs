//! Host bridge: stdio transport, JSON-RPC 2.0, newline-delimited.
//!
//! Lets a devtools UI written in another language drive the integration as
//! a sidecar. Reads JSON-RPC requests from stdin (one per line), answers on
//! stdout. Logs go to stderr.
//!
//! Protocol flow:
//! 1. Client sends `initialize` → server responds with capabilities
//! 2. Client sends `tabs/list` whenever it renders its tab bar
//! 3. Client sends `tabs/action` when a tab button is clicked
//! 4. Client sends `shutdown` or closes stdin → close hooks run (the editor
//!    server is killed) and the bridge exits

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::VsCodeOptions;
use crate::host::{CustomTab, HookRegistry};
use crate::launcher;

/// Maximum size of a single JSON-RPC line (10 MiB).
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Bridge protocol revision reported by `initialize`.
const PROTOCOL_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Bridge protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    name: String,
    version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerCapabilities {
    custom_tabs: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

/// `tabs/list` result.
#[derive(Debug, Serialize)]
pub struct TabsListResult {
    pub tabs: Vec<CustomTab>,
}

/// `tabs/action` params.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabActionParams {
    /// Tab name, e.g. `builtin-vscode`.
    pub name: String,
    /// Position of the action in the tab's action list.
    #[serde(default)]
    pub index: usize,
    /// Reply only once the triggered start has settled.
    #[serde(default)]
    pub wait: bool,
}

// ---------------------------------------------------------------------------
// Bridge configuration
// ---------------------------------------------------------------------------

/// Configuration for the host bridge.
#[derive(Debug, Clone)]
pub struct HostServerConfig {
    /// Project directory opened in the editor.
    pub root_dir: PathBuf,
    pub options: VsCodeOptions,
}

impl Default for HostServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            options: VsCodeOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server main loop
// ---------------------------------------------------------------------------

/// Set up the integration and serve the host bridge on stdin/stdout.
///
/// # Errors
///
/// Returns an error if stdin/stdout I/O fails fatally.
pub async fn run_host_server(config: HostServerConfig) -> Result<()> {
    info!(
        root = %config.root_dir.display(),
        mode = ?config.options.mode,
        port = config.options.port,
        "devtools-vscode bridge starting"
    );

    let registry = Arc::new(HookRegistry::new());
    let _launcher = launcher::setup(registry.clone(), config.options, config.root_dir);

    serve(&registry, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve the bridge protocol for `registry` over `input`/`output`.
///
/// Runs the registry's close hooks on `shutdown` or EOF.
///
/// # Errors
///
/// Returns an error if reading or writing fails fatally.
pub async fn serve<R, W>(registry: &HookRegistry, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = serve_loop(registry, input, output).await;
    registry.close();
    info!("devtools-vscode bridge stopped");
    result
}

async fn serve_loop<R, W>(registry: &HookRegistry, input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        let read = read_line_limited(&mut reader, &mut line_buf, MAX_LINE_BYTES)
            .await
            .context("failed to read from stdin")?;

        match read {
            LineRead::Eof => {
                info!("stdin closed, shutting down");
                return Ok(());
            }
            LineRead::TooLong => {
                warn!(max_bytes = MAX_LINE_BYTES, "oversized request line discarded");
                let resp = error_response(
                    None,
                    -32600,
                    &format!("invalid request: line exceeds {MAX_LINE_BYTES} bytes"),
                );
                write_response(&mut output, &resp).await?;
                continue;
            }
            LineRead::Line => {}
        }

        let trimmed = line_buf.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        debug!(raw = %String::from_utf8_lossy(trimmed), "received request");

        let request: JsonRpcRequest = match serde_json::from_slice(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid JSON-RPC request");
                let resp = error_response(None, -32700, &format!("parse error: {e}"));
                write_response(&mut output, &resp).await?;
                continue;
            }
        };

        if request.jsonrpc != "2.0" {
            warn!(version = request.jsonrpc, "invalid JSON-RPC version (expected \"2.0\")");
            let resp = error_response(
                request.id.clone(),
                -32600,
                &format!("invalid request: jsonrpc version must be \"2.0\", got \"{}\"", request.jsonrpc),
            );
            write_response(&mut output, &resp).await?;
            continue;
        }

        // Notifications (no id) never get a response.
        let is_notification = request.id.is_none();
        let response = dispatch(registry, &request).await;

        if is_notification {
            debug!(method = request.method, "notification handled (no response)");
        } else if let Some(resp) = response {
            write_response(&mut output, &resp).await?;
        }

        if request.method == "shutdown" {
            info!("shutdown requested");
            return Ok(());
        }
    }
}

/// Dispatch a JSON-RPC request to the appropriate handler.
async fn dispatch(registry: &HookRegistry, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(req)),
        "tabs/list" => Some(handle_tabs_list(registry, req)),
        "tabs/action" => Some(handle_tab_action(registry, req).await),
        "ping" | "shutdown" => Some(success_response(req.id.clone(), &serde_json::json!({}))),
        _ => {
            warn!(method = req.method, "unknown method");
            Some(error_response(
                req.id.clone(),
                -32601,
                &format!("method not found: {}", req.method),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_initialize(req: &JsonRpcRequest) -> JsonRpcResponse {
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_owned(),
        capabilities: ServerCapabilities { custom_tabs: true },
        server_info: ServerInfo {
            name: "devtools-vscode".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
    };

    success_response(req.id.clone(), &result)
}

fn handle_tabs_list(registry: &HookRegistry, req: &JsonRpcRequest) -> JsonRpcResponse {
    let result = TabsListResult {
        tabs: registry.custom_tabs(),
    };
    success_response(req.id.clone(), &result)
}

async fn handle_tab_action(registry: &HookRegistry, req: &JsonRpcRequest) -> JsonRpcResponse {
    let params: TabActionParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                req.id.clone(),
                -32602,
                &format!("invalid tabs/action params: {e}"),
            );
        }
    };

    let Some(handle) = registry.find_action(&params.name, params.index) else {
        return error_response(
            req.id.clone(),
            -32602,
            &format!("tab {} has no action {}", params.name, params.index),
        );
    };

    debug!(tab = params.name, index = params.index, "tab action triggered");
    let task = handle.invoke();

    if !params.wait {
        return success_response(req.id.clone(), &serde_json::json!({ "triggered": true }));
    }

    match task.await {
        Ok(()) => success_response(
            req.id.clone(),
            &serde_json::json!({ "triggered": true, "settled": true }),
        ),
        Err(e) => error_response(req.id.clone(), -32000, &format!("start failed: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn success_response(id: Option<serde_json::Value>, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(v) => JsonRpcResponse {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(v),
            error: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize success response");
            error_response(id, -32603, &format!("internal error: failed to serialize result: {e}"))
        }
    }
}

fn error_response(id: Option<serde_json::Value>, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_owned(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_owned(),
            data: None,
        }),
    }
}

/// Write a JSON-RPC response as a single line.
async fn write_response(out: &mut (impl AsyncWrite + Unpin), resp: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(resp).context("failed to serialize response")?;
    debug!(response = json, "sending response");
    out.write_all(json.as_bytes())
        .await
        .context("failed to write to stdout")?;
    out.write_all(b"\n")
        .await
        .context("failed to write newline to stdout")?;
    out.flush().await.context("failed to flush stdout")?;
    Ok(())
}

/// Outcome of reading one request line.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A line (possibly without trailing newline at EOF) was appended to the buffer.
    Line,
    /// The line exceeded the limit; it was consumed and discarded.
    TooLong,
    Eof,
}

/// Read one line of raw bytes from `reader` into `buf`, up to `max_bytes`.
///
/// Bytes are collected as-is and decoded by the caller once the line is
/// complete, so multi-byte characters may straddle buffer refills. An
/// oversized line is drained up to its newline and reported as
/// [`LineRead::TooLong`] so the next line can still be served.
async fn read_line_limited(
    reader: &mut (impl AsyncBufRead + Unpin),
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<LineRead> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await.context("stdin fill_buf failed")?;
        if available.is_empty() {
            return Ok(if total == 0 { LineRead::Eof } else { LineRead::Line });
        }
        let (consumed, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if total + consumed > max_bytes {
            reader.consume(consumed);
            if !found_newline {
                discard_until_newline(reader).await?;
            }
            buf.clear();
            return Ok(LineRead::TooLong);
        }
        buf.extend_from_slice(&available[..consumed]);
        total += consumed;
        reader.consume(consumed);
        if found_newline {
            return Ok(LineRead::Line);
        }
    }
}

async fn discard_until_newline(reader: &mut (impl AsyncBufRead + Unpin)) -> Result<()> {
    loop {
        let rest = reader.fill_buf().await.context("stdin fill_buf failed")?;
        if rest.is_empty() {
            return Ok(());
        }
        if let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let eat = rest.len();
        reader.consume(eat);
    }
}
