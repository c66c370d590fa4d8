//! Minimal WebDriver (W3C) client for headless browser test runs.
//!
//! Driver discovery, in order:
//! 1. `WEBDRIVER_REMOTE_URL`: an already running driver
//! 2. `WEBDRIVER_PATH`: a driver executable to launch
//! 3. `chromedriver`, `geckodriver`, `safaridriver`, `msedgedriver` on `PATH`

use std::env;
use std::io::{BufRead, BufReader, Read};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use super::RunnerError;
use crate::utils::exec::Cmd;
use crate::utils::platform::shutdown_child;

pub const REMOTE_URL_VAR: &str = "WEBDRIVER_REMOTE_URL";
pub const DRIVER_PATH_VAR: &str = "WEBDRIVER_PATH";

const DRIVER_CANDIDATES: &[&str] = &["chromedriver", "geckodriver", "safaridriver", "msedgedriver"];

/// Session creation attempts while a launched driver starts up.
const SESSION_RETRIES: u32 = 40;
const SESSION_RETRY_DELAY: Duration = Duration::from_millis(250);

const USER_AGENT: &str = concat!("wasmdev/", env!("CARGO_PKG_VERSION"));

/// Remediation printed when no driver is found.
pub const DRIVER_REMEDIATION: &str = "\
make sure one of the following holds (in order of priority):
  1. `WEBDRIVER_REMOTE_URL` is the address of a running driver, like `WEBDRIVER_REMOTE_URL=http://localhost:9515`
  2. `WEBDRIVER_PATH` is the path to a WebDriver executable
  3. `chromedriver`, `geckodriver`, `safaridriver` or `msedgedriver` is installed in `PATH`";

/// Capabilities requesting a headless window from any of the common drivers.
///
/// Drivers ignore vendor keys of other browsers.
pub fn headless_capabilities() -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "goog:chromeOptions": {
                    "args": ["--headless", "--no-sandbox", "--disable-dev-shm-usage"]
                },
                "moz:firefoxOptions": {
                    "args": ["-headless"]
                },
                "ms:edgeOptions": {
                    "args": ["--headless", "--no-sandbox"]
                }
            }
        }
    })
}

/// Where the driver lives.
pub enum DriverService {
    /// Already running somewhere else
    Remote(String),
    /// Launched by us; killed on dispose
    Launched { endpoint: String, child: Child },
}

impl DriverService {
    /// Find or launch a driver.
    pub fn discover() -> Result<Self, RunnerError> {
        if let Some(remote) = env::var(REMOTE_URL_VAR).ok().filter(|v| !v.is_empty()) {
            let parsed = url::Url::parse(&remote).map_err(|_| {
                RunnerError::WebDriver(format!("invalid remote WebDriver URL: {remote}"))
            })?;
            crate::debug!("webdriver"; "using remote driver {}", parsed);
            return Ok(Self::Remote(remote.trim_end_matches('/').to_string()));
        }

        if let Some(path) = configured_driver_path() {
            return Self::launch(&path);
        }

        let found = DRIVER_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| RunnerError::unavailable("WebDriver", DRIVER_REMEDIATION))?;
        Self::launch(&found)
    }

    /// Launch `executable --port=<free port>`.
    pub fn launch(executable: &Path) -> Result<Self, RunnerError> {
        let port = free_port()?;
        crate::log!("webdriver"; "launching {}", executable.display());
        let mut child = Cmd::new(executable)
            .arg(format!("--port={port}"))
            .spawn_piped()?;
        forward_output(&mut child);
        Ok(Self::Launched {
            endpoint: format!("http://127.0.0.1:{port}"),
            child,
        })
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Remote(endpoint) | Self::Launched { endpoint, .. } => endpoint,
        }
    }

    /// Stop a launched driver.
    pub fn dispose(self) {
        if let Self::Launched { mut child, .. } = self
            && let Err(e) = shutdown_child(&mut child, Duration::ZERO)
        {
            crate::debug!("webdriver"; "failed to stop driver: {}", e);
        }
    }
}

/// Drain the driver's stdout and stderr into verbose logging, so a chatty
/// driver never blocks on a full pipe.
fn forward_output(child: &mut Child) {
    fn drain(reader: impl Read + Send + 'static) {
        thread::spawn(move || {
            for line in BufReader::new(reader).lines() {
                match line {
                    Ok(line) => crate::debug!("webdriver"; "{}", line),
                    Err(_) => break,
                }
            }
        });
    }
    if let Some(stdout) = child.stdout.take() {
        drain(stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        drain(stderr);
    }
}

fn free_port() -> Result<u16, RunnerError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[derive(Deserialize)]
struct ValueResponse<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSession {
    session_id: String,
}

#[derive(Deserialize)]
struct ErrorValue {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// An open WebDriver session.
pub struct WebDriverClient {
    agent: ureq::Agent,
    endpoint: String,
    session_id: String,
}

impl WebDriverClient {
    /// Create a session, retrying while the driver is still starting.
    pub fn new_session(endpoint: &str, capabilities: &Value) -> Result<Self, RunnerError> {
        let agent = ureq::AgentBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build();
        let url = format!("{endpoint}/session");

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match agent.post(&url).send_json(capabilities) {
                Ok(response) => break response,
                Err(ureq::Error::Transport(e)) if attempt < SESSION_RETRIES => {
                    crate::debug!("webdriver"; "driver not ready ({}), retrying", e);
                    thread::sleep(SESSION_RETRY_DELAY);
                }
                Err(e) => return Err(driver_error(&url, e)),
            }
        };

        let session: ValueResponse<NewSession> = response
            .into_json()
            .map_err(|e| RunnerError::WebDriver(format!("malformed new session response: {e}")))?;
        crate::debug!("webdriver"; "session {}", session.value.session_id);

        Ok(Self {
            agent,
            endpoint: endpoint.to_string(),
            session_id: session.value.session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.endpoint, self.session_id, suffix)
    }

    /// Navigate the session's window to `target`.
    pub fn goto(&self, target: &str) -> Result<(), RunnerError> {
        let url = self.session_url("/url");
        self.agent
            .post(&url)
            .send_json(json!({ "url": target }))
            .map_err(|e| driver_error(&url, e))?;
        Ok(())
    }

    /// Close the session (and its browser window).
    pub fn close(self) -> Result<(), RunnerError> {
        let url = self.session_url("");
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| driver_error(&url, e))?;
        Ok(())
    }
}

fn driver_error(url: &str, error: ureq::Error) -> RunnerError {
    match error {
        ureq::Error::Status(status, response) => {
            let detail = response
                .into_json::<ValueResponse<ErrorValue>>()
                .map(|body| format!("{}: {}", body.value.error, body.value.message))
                .unwrap_or_default();
            RunnerError::WebDriver(format!("{url} failed with status {status}. {detail}"))
        }
        ureq::Error::Transport(e) => RunnerError::WebDriver(format!("{url}: {e}")),
    }
}

/// Driver executable named in `WEBDRIVER_PATH`, if any.
pub fn configured_driver_path() -> Option<PathBuf> {
    env::var_os(DRIVER_PATH_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    /// Serve canned HTTP responses, one per connection, recording request lines.
    fn fake_driver(responses: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for body in responses {
                let (stream, _) = listener.accept().unwrap();
                seen.push(read_request(stream, body));
            }
            seen
        });
        (endpoint, handle)
    }

    fn read_request(mut stream: TcpStream, body: &str) -> String {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.trim().is_empty() {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                length = value.trim().parse().unwrap();
            }
        }
        let mut payload = vec![0; length];
        reader.read_exact(&mut payload).unwrap();

        let status = if body.contains("\"error\"") { "500 Internal Server Error" } else { "200 OK" };
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .unwrap();
        format!("{} {}", request_line.trim(), String::from_utf8_lossy(&payload))
    }

    #[test]
    fn test_capabilities_cover_common_drivers() {
        let caps = headless_capabilities();
        let always = &caps["capabilities"]["alwaysMatch"];
        assert!(always["goog:chromeOptions"]["args"][0] == "--headless");
        assert!(always["moz:firefoxOptions"]["args"][0] == "-headless");
        assert!(always.get("ms:edgeOptions").is_some());
    }

    #[test]
    fn test_session_lifecycle() {
        let (endpoint, handle) = fake_driver(vec![
            r#"{"value":{"sessionId":"abc123","capabilities":{}}}"#,
            r#"{"value":null}"#,
            r#"{"value":null}"#,
        ]);

        let client = WebDriverClient::new_session(&endpoint, &headless_capabilities()).unwrap();
        assert_eq!(client.session_id(), "abc123");
        client.goto("http://127.0.0.1:8080").unwrap();
        client.close().unwrap();

        let seen = handle.join().unwrap();
        assert!(seen[0].starts_with("POST /session HTTP/1.1"));
        assert!(seen[0].contains("alwaysMatch"));
        assert!(seen[1].starts_with("POST /session/abc123/url"));
        assert!(seen[1].contains(r#""url":"http://127.0.0.1:8080""#));
        assert!(seen[2].starts_with("DELETE /session/abc123 "));
    }

    #[test]
    fn test_driver_error_carries_message() {
        let (endpoint, handle) = fake_driver(vec![
            r#"{"value":{"error":"session not created","message":"no chrome binary"}}"#,
        ]);
        let err = WebDriverClient::new_session(&endpoint, &headless_capabilities())
            .err()
            .unwrap();
        handle.join().unwrap();
        let text = err.to_string();
        assert!(text.contains("500"));
        assert!(text.contains("no chrome binary"));
    }

    #[test]
    fn test_remote_endpoint_is_used_as_is() {
        let service = DriverService::Remote("http://localhost:9515".into());
        assert_eq!(service.endpoint(), "http://localhost:9515");
        service.dispose();
    }

    #[cfg(unix)]
    #[test]
    fn test_launched_driver_output_is_drained() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("past-output");
        let driver = dir.path().join("chattydriver");
        std::fs::write(
            &driver,
            format!(
                "#!/bin/sh\nyes 'driver log line' | head -c 300000\nyes 'driver warning' | head -c 300000 >&2\ntouch '{}'\nexec sleep 30\n",
                marker.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&driver, std::fs::Permissions::from_mode(0o755)).unwrap();

        let service = DriverService::launch(&driver).unwrap();
        assert!(service.endpoint().starts_with("http://127.0.0.1:"));

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !marker.exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        let drained = marker.exists();
        service.dispose();
        assert!(drained, "driver blocked writing its output");
    }
}
