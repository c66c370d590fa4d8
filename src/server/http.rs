//! HTTP routes of the live server.
//!
//! | Route                | Response                                        |
//! |----------------------|-------------------------------------------------|
//! | `/`                  | HTML shell (or the custom index page)           |
//! | `/dev.js`, `/test.js`| client script rendered with the push URL       |
//! | `/wasi.js`           | browser WASI shim                               |
//! | `/main.wasm`         | build artifact, streamed; 503 until it exists   |
//! | `/process-info.json` | pid, server, test args and env                 |
//! | anything else        | static resources, then 404                      |

use std::collections::BTreeMap;
use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::embed::serve::{
    ClientVars, DEV_JS, DEV_JS_PATH, INDEX_HTML, IndexVars, TEST_JS, TEST_JS_PATH, WASI_JS,
    WASI_JS_PATH,
};
use crate::log;
use crate::session::Shutdown;
use crate::utils::mime::{self, types};

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Request handler threads.
const REQUEST_THREADS: usize = 4;

pub const ARTIFACT_PATH: &str = "/main.wasm";
pub const PROCESS_INFO_PATH: &str = "/process-info.json";

const SERVER_NAME: &str = "wasmdev dev server";

/// Session flavour of the live server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// Dev loop: `/dev.js`, reload on push
    Dev,
    /// Browser test run: `/test.js`, with the args and env handed to the bundle
    Test {
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
}

impl ServerMode {
    fn script_path(&self) -> &'static str {
        match self {
            Self::Dev => DEV_JS_PATH,
            Self::Test { .. } => TEST_JS_PATH,
        }
    }
}

/// Everything the request handlers need.
#[derive(Debug, Clone)]
pub struct Routes {
    pub mode: ServerMode,
    pub title: String,
    pub artifact: PathBuf,
    pub resources: Vec<PathBuf>,
    pub custom_index_page: Option<PathBuf>,
    pub push_url: String,
}

/// What a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Index,
    CustomIndex(PathBuf),
    Script,
    Wasi,
    Artifact,
    ProcessInfo,
    Resource(PathBuf),
    NotFound,
}

impl Routes {
    fn resolve(&self, url: &str) -> Route {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path {
            "/" | "/index.html" => match &self.custom_index_page {
                Some(page) => Route::CustomIndex(page.clone()),
                None => Route::Index,
            },
            p if p == self.mode.script_path() => Route::Script,
            WASI_JS_PATH => Route::Wasi,
            ARTIFACT_PATH => Route::Artifact,
            PROCESS_INFO_PATH => Route::ProcessInfo,
            _ => self
                .resources
                .iter()
                .find_map(|root| resolve_path(path, root))
                .map_or(Route::NotFound, Route::Resource),
        }
    }
}

// ============================================================================
// Server header
// ============================================================================

/// `Server` header value identifying this process.
pub fn server_header() -> String {
    format!(
        "{SERVER_NAME}/{} (PID {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    )
}

/// Parse a [`server_header`] value back into `(version, pid)`.
#[cfg(test)]
fn parse_server_header(value: &str) -> Option<(String, u32)> {
    let rest = value.strip_prefix(SERVER_NAME)?.strip_prefix('/')?;
    let (version, pid) = rest.split_once(" (PID ")?;
    let pid = pid.strip_suffix(')')?.parse().ok()?;
    Some((version.to_string(), pid))
}

#[derive(Serialize)]
struct ProcessInfo<'a> {
    pid: u32,
    server: String,
    args: &'a [String],
    env: &'a BTreeMap<String, String>,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Bind to the specified interface and port, with automatic port retry.
pub fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr)> {
    let mut last_error = String::new();

    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        match Server::http(SocketAddr::new(interface, port)) {
            Ok(server) => {
                let addr = server
                    .server_addr()
                    .to_ip()
                    .unwrap_or_else(|| SocketAddr::new(interface, port));
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, addr.port());
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(anyhow::anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        MAX_PORT_RETRIES,
        base_port,
        base_port.saturating_add(MAX_PORT_RETRIES - 1),
        last_error
    ))
}

/// Serve requests until the server is unblocked.
pub fn run_request_loop(server: &Server, routes: Arc<Routes>, shutdown: Shutdown) -> Result<()> {
    // Large artifact downloads must not stall script requests
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(REQUEST_THREADS)
        .build()
        .context("failed to create request thread pool")?;

    for request in server.incoming_requests() {
        let routes = Arc::clone(&routes);
        let shutdown = shutdown.clone();
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &routes, &shutdown) {
                crate::debug!("serve"; "request error: {e}");
            }
        });
    }
    Ok(())
}

/// Handle a single HTTP request
fn handle_request(request: Request, routes: &Routes, shutdown: &Shutdown) -> Result<()> {
    if shutdown.is_cancelled() {
        return send_body(request, 503, types::PLAIN, b"503 Service Unavailable".to_vec());
    }

    crate::debug!("serve"; "{} {}", request.method(), request.url());
    match routes.resolve(request.url()) {
        Route::Index => {
            let body = INDEX_HTML.render(&IndexVars {
                title: routes.title.clone(),
                script: routes.mode.script_path(),
            });
            send_body(request, 200, types::HTML, body.into_bytes())
        }
        Route::CustomIndex(page) => respond_file(request, &page),
        Route::Script => {
            let vars = ClientVars {
                push_url: routes.push_url.clone(),
            };
            let body = match routes.mode {
                ServerMode::Dev => DEV_JS.render(&vars),
                ServerMode::Test { .. } => TEST_JS.render(&vars),
            };
            send_body(request, 200, types::JAVASCRIPT, body.into_bytes())
        }
        Route::Wasi => send_body(request, 200, types::JAVASCRIPT, WASI_JS.as_bytes().to_vec()),
        Route::Artifact if routes.artifact.is_file() => respond_file(request, &routes.artifact),
        Route::Artifact => send_body(
            request,
            503,
            types::PLAIN,
            b"503 Service Unavailable: no build artifact yet".to_vec(),
        ),
        Route::ProcessInfo => {
            let empty = BTreeMap::new();
            let (args, env) = match &routes.mode {
                ServerMode::Test { args, env } => (args.as_slice(), env),
                ServerMode::Dev => (&[][..], &empty),
            };
            let info = ProcessInfo {
                pid: std::process::id(),
                server: server_header(),
                args,
                env,
            };
            let body = serde_json::to_vec(&info)?;
            send_body(request, 200, types::JSON, body)
        }
        Route::Resource(path) => respond_file(request, &path),
        Route::NotFound => send_body(request, 404, types::PLAIN, b"404 Not Found".to_vec()),
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Stream a file from disk.
fn respond_file(request: Request, path: &Path) -> Result<()> {
    let content_type = mime::from_path(path);
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file.metadata()?.len();

    if is_head_request(&request) {
        return send_head(request, 200, content_type, usize::try_from(len).ok());
    }

    let response = Response::new(
        StatusCode(200),
        headers(content_type),
        file,
        usize::try_from(len).ok(),
        None,
    );
    request.respond(response)?;
    Ok(())
}

fn is_head_request(request: &Request) -> bool {
    request.method() == &Method::Head
}

/// Headers only. `len` is the length a GET would have sent; tiny_http
/// writes it as `Content-Length` and skips the body for HEAD.
fn send_head(request: Request, status: u16, content_type: &str, len: Option<usize>) -> Result<()> {
    let response = Response::new(
        StatusCode(status),
        headers(content_type),
        std::io::empty(),
        len,
        None,
    );
    request.respond(response)?;
    Ok(())
}

fn send_body(request: Request, status: u16, content_type: &str, body: Vec<u8>) -> Result<()> {
    let len = body.len();
    if is_head_request(&request) {
        return send_head(request, status, content_type, Some(len));
    }
    let response = Response::new(
        StatusCode(status),
        headers(content_type),
        std::io::Cursor::new(body),
        Some(len),
        None,
    );
    request.respond(response)?;
    Ok(())
}

fn headers(content_type: &str) -> Vec<Header> {
    [
        make_header("Content-Type", content_type),
        make_header("Server", &server_header()),
        make_header("Cache-Control", "no-store"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn make_header(key: &str, value: &str) -> Option<Header> {
    Header::from_bytes(key.as_bytes(), value.as_bytes()).ok()
}

// ============================================================================
// Path resolution
// ============================================================================

/// Resolve URL to a file under `serve_root`, handling index.html for directories
fn resolve_path(url: &str, serve_root: &Path) -> Option<PathBuf> {
    let clean = normalize_url(url);

    // Reject paths with suspicious patterns early
    if clean.contains("..") {
        return None;
    }

    let local = serve_root.join(&clean);

    // Symlinks and encoded sequences must not escape serve_root
    let canonical = local.canonicalize().ok()?;
    let root_canonical = serve_root.canonicalize().ok()?;
    if !canonical.starts_with(&root_canonical) {
        return None;
    }

    if canonical.is_file() {
        return Some(canonical);
    }

    if canonical.is_dir() {
        let index = canonical.join("index.html");
        if index.is_file() {
            return Some(index);
        }
    }

    None
}

/// Normalize URL: decode, strip query string, trim slashes
fn normalize_url(url: &str) -> String {
    use percent_encoding::percent_decode_str;
    let decoded = percent_decode_str(url)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_default();

    let path = decoded.split('?').next().unwrap_or(&decoded);
    path.trim_matches('/').to_string()
}
