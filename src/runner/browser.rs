//! Browser test runs.
//!
//! Serves the bundle from a live server in test mode (no watcher, no
//! builder). The page's `test.js` runs it under the browser WASI shim and
//! reports back over the push channel:
//!
//! ```text
//! browser --[stdout/stderr frames]--> printed + captured
//!         --[stackTrace]------------> formatted for the engine, printed
//!         --[testPassed]------------> run passed
//!         --[errorReport]-----------> run failed
//! ```
//!
//! Headless runs drive the browser through WebDriver; otherwise the system
//! browser is opened on the server URL.

use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use super::webdriver::{DriverService, WebDriverClient, headless_capabilities};
use super::{EnvironmentKind, RunnerError, TestRunner, TestRunnerOptions, conclude};
use crate::config::{DevConfig, TestConfig};
use crate::diagnostics::{TestReport, TraceFormat, format_stack_trace};
use crate::log;
use crate::server::{
    ClientEvent, ClientMessage, ClientPayload, LiveServer, OutputStream, ServerMode, ServerOptions,
};
use crate::session::Shutdown;
use crate::utils::platform::open_browser;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the bundle in a web browser.
#[derive(Clone)]
pub struct BrowserRunner {
    bind: IpAddr,
    port: u16,
    host: String,
    ws_port: u16,
    headless: bool,
    timeout: Option<Duration>,
    shutdown: Shutdown,
}

impl BrowserRunner {
    pub fn new(dev: &DevConfig, test: &TestConfig, shutdown: Shutdown) -> Self {
        Self {
            bind: dev.bind,
            port: dev.port,
            host: dev.host(),
            ws_port: dev.ws_port,
            headless: test.headless,
            timeout: (test.timeout_secs > 0).then(|| Duration::from_secs(test.timeout_secs)),
            shutdown,
        }
    }

    fn server_options(&self, bundle: &Path, options: &TestRunnerOptions) -> ServerOptions {
        ServerOptions {
            bind: self.bind,
            port: self.port,
            host: self.host.clone(),
            ws_port: self.ws_port,
            mode: ServerMode::Test {
                args: options.libtest_args(),
                env: options.env.clone(),
            },
            title: "wasmdev test".to_string(),
            artifact: bundle.to_path_buf(),
            resources: Vec::new(),
            custom_index_page: None,
        }
    }

    /// Open a WebDriver session on `url`. The driver is disposed on failure.
    fn open_session(&self, url: &str) -> Result<(WebDriverClient, DriverService), RunnerError> {
        let service = DriverService::discover()?;
        let client = match WebDriverClient::new_session(service.endpoint(), &headless_capabilities()) {
            Ok(client) => client,
            Err(e) => {
                service.dispose();
                return Err(e);
            }
        };
        if let Err(e) = client.goto(url) {
            let _ = client.close();
            service.dispose();
            return Err(e);
        }
        Ok((client, service))
    }

    /// Wait for the page to report a verdict.
    fn collect(&self, events: &Receiver<ClientMessage>) -> Result<RunCollector, RunnerError> {
        let started = Instant::now();
        let mut collector = RunCollector::default();

        while collector.verdict.is_none() {
            if self.shutdown.is_cancelled() {
                return Err(anyhow::anyhow!("test run interrupted").into());
            }
            let wait = match self.timeout {
                Some(limit) => {
                    let Some(remaining) = limit.checked_sub(started.elapsed()) else {
                        return Err(RunnerError::Timeout(limit.as_secs()));
                    };
                    remaining.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            match events.recv_timeout(wait) {
                Ok(message) => collector.handle(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow::anyhow!("live server stopped before the tests finished").into());
                }
            }
        }
        Ok(collector)
    }
}

impl TestRunner for BrowserRunner {
    fn environment(&self) -> EnvironmentKind {
        EnvironmentKind::Browser
    }

    fn run(&self, bundle: &Path, options: &TestRunnerOptions) -> Result<TestReport, RunnerError> {
        if !bundle.is_file() {
            return Err(anyhow::anyhow!("test bundle {} does not exist", bundle.display()).into());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let _guard = runtime.enter();

        let server = LiveServer::start(self.server_options(bundle, options), &self.shutdown)?;
        let events = server.events();

        let driver = if self.headless {
            match self.open_session(server.url()) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    self.shutdown.cancel();
                    let _ = server.wait();
                    return Err(e);
                }
            }
        } else {
            if let Err(e) = open_browser(server.url()) {
                log!("error"; "failed to open browser: {:#}", e);
            }
            log!("test"; "open {} to run the tests", server.url());
            None
        };

        let collected = self.collect(&events);

        if let Some((client, service)) = driver {
            if let Err(e) = client.close() {
                crate::debug!("webdriver"; "failed to close session: {}", e);
            }
            service.dispose();
        }
        self.shutdown.cancel();
        if let Err(e) = server.wait() {
            crate::debug!("serve"; "{:#}", e);
        }

        conclude(collected?.into_report())
    }
}

/// Accumulates what the page reports during one run.
#[derive(Debug, Default)]
struct RunCollector {
    output: String,
    /// `Some(passed)` once the page reported an outcome
    verdict: Option<bool>,
}

impl RunCollector {
    fn handle(&mut self, message: ClientMessage) {
        match message.payload {
            ClientPayload::Output(chunk) => {
                echo(chunk.stream, &chunk.text);
                self.output.push_str(&chunk.text);
            }
            ClientPayload::Event(ClientEvent::TestRunOutput { output }) => {
                echo(OutputStream::Stdout, &output);
                self.output.push_str(&output);
            }
            ClientPayload::Event(ClientEvent::StackTrace { stack_trace }) => {
                let format = message
                    .format
                    .unwrap_or_else(|| TraceFormat::detect(&stack_trace));
                crate::logger::print_block(&format_stack_trace(&stack_trace, format));
                self.output.push_str(&stack_trace);
                self.output.push('\n');
            }
            ClientPayload::Event(ClientEvent::TestPassed) => {
                self.verdict.get_or_insert(true);
            }
            ClientPayload::Event(ClientEvent::ErrorReport { report }) => {
                log!("error"; "{}", report);
                self.output.push_str(&report);
                self.output.push('\n');
                self.verdict.get_or_insert(false);
            }
        }
    }

    fn into_report(self) -> TestReport {
        TestReport::from_libtest(&self.output, self.verdict.unwrap_or(false))
    }
}

fn echo(stream: OutputStream, text: &str) {
    let _ = match stream {
        OutputStream::Stdout => std::io::stdout().lock().write_all(text.as_bytes()),
        OutputStream::Stderr => std::io::stderr().lock().write_all(text.as_bytes()),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::OutputChunk;
    use std::collections::BTreeMap;

    fn message(payload: ClientPayload) -> ClientMessage {
        ClientMessage {
            client: 0,
            format: None,
            payload,
        }
    }

    fn output(text: &str) -> ClientPayload {
        ClientPayload::Output(OutputChunk {
            stream: OutputStream::Stdout,
            text: text.to_string(),
        })
    }

    #[test]
    fn test_collector_passing_run() {
        let mut collector = RunCollector::default();
        collector.handle(message(output("test math::adds ... ok\n")));
        collector.handle(message(output("test result: ok. 1 passed\n")));
        assert!(collector.verdict.is_none());
        collector.handle(message(ClientPayload::Event(ClientEvent::TestPassed)));

        let report = collector.into_report();
        assert!(report.passed);
        assert_eq!(report.case_names(), vec!["math::adds"]);
    }

    #[test]
    fn test_collector_error_report_fails_run() {
        let mut collector = RunCollector::default();
        collector.handle(message(ClientPayload::Event(ClientEvent::StackTrace {
            stack_trace: "RuntimeError: unreachable\n    at app.wasm.__rust_start_panic (wasm://wasm/app.wasm-0001:wasm-function[9]:0x10)".into(),
        })));
        collector.handle(message(ClientPayload::Event(ClientEvent::ErrorReport {
            report: "RuntimeError: unreachable".into(),
        })));
        // A late testPassed does not flip the verdict
        collector.handle(message(ClientPayload::Event(ClientEvent::TestPassed)));

        assert_eq!(collector.verdict, Some(false));
        let report = collector.into_report();
        assert!(!report.passed);
        assert!(report.output.contains("RuntimeError: unreachable"));
    }

    #[test]
    fn test_missing_bundle_is_an_error() {
        let runner = BrowserRunner::new(&DevConfig::default(), &TestConfig::default(), Shutdown::new());
        let err = runner
            .run(Path::new("/nonexistent/suite.wasm"), &TestRunnerOptions::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_server_options_carry_test_args() {
        let runner = BrowserRunner::new(&DevConfig::default(), &TestConfig::default(), Shutdown::new());
        let options = TestRunnerOptions {
            env: BTreeMap::from([("A".to_string(), "1".to_string())]),
            list_test_cases: true,
            test_cases: vec![],
        };
        let server = runner.server_options(Path::new("/tmp/suite.wasm"), &options);
        assert_eq!(
            server.mode,
            ServerMode::Test {
                args: vec!["--list".into(), "--format".into(), "terse".into()],
                env: options.env.clone(),
            }
        );
        assert_eq!(server.artifact, Path::new("/tmp/suite.wasm"));
    }

    #[test]
    fn test_collect_times_out() {
        let mut test = TestConfig::default();
        test.timeout_secs = 1;
        let runner = BrowserRunner::new(&DevConfig::default(), &test, Shutdown::new());
        let (_tx, rx) = crossbeam::channel::unbounded();
        let err = runner.collect(&rx).unwrap_err();
        assert!(matches!(err, RunnerError::Timeout(1)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_page_verdict_over_push_channel() {
        let dir = tempfile::TempDir::new().unwrap();
        let bundle = dir.path().join("suite.wasm");
        std::fs::write(&bundle, b"\0asm").unwrap();

        let mut dev = DevConfig::default();
        dev.bind = "127.0.0.1".parse().unwrap();
        dev.port = 0;
        dev.ws_port = 0;
        let runner = BrowserRunner::new(&dev, &TestConfig::default(), Shutdown::new());
        let shutdown = Shutdown::new();
        let server = LiveServer::start(
            runner.server_options(&bundle, &TestRunnerOptions::default()),
            &shutdown,
        )
        .unwrap();

        let script = ureq::get(&format!("{}/test.js", server.url()))
            .call()
            .unwrap()
            .into_string()
            .unwrap();
        let start = script.find("ws://").unwrap();
        let end = start + script[start..].find('"').unwrap();
        let push_url = script[start..end].to_string();

        // Plays the page: two output frames, then the verdict
        tokio::task::spawn_blocking(move || {
            let (mut ws, _) = tungstenite::connect(push_url.as_str()).unwrap();
            let mut frame = OutputStream::STDOUT_KIND.to_le_bytes().to_vec();
            frame.extend_from_slice(b"test a::b ... ok\n");
            ws.send(tungstenite::Message::Binary(frame.into())).unwrap();
            ws.send(tungstenite::Message::Text(r#"{"kind":"testPassed"}"#.into()))
                .unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });

        let events = server.events();
        let collector = tokio::task::spawn_blocking(move || runner.collect(&events))
            .await
            .unwrap()
            .unwrap();
        let report = collector.into_report();
        assert!(report.passed);
        assert_eq!(report.case_names(), vec!["a::b"]);

        shutdown.cancel();
    }
}
