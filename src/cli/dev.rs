//! `wasmdev dev`: watch, rebuild in a separate process, serve with live reload.
//!
//! Thin wiring, no business logic:
//!
//! ```text
//! WatchActor --[Trigger]--> Coordinator --> build link --FIFOs--> build-executor
//!                               |
//!                               +--[Outcome]--> HubActor --> browsers
//! browsers --[events, output]--> client log thread
//! ```

use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::config::Config;
use crate::diagnostics::{TraceFormat, format_stack_trace};
use crate::log;
use crate::server::{
    ClientEvent, ClientMessage, ClientPayload, LiveServer, OutputStream, ServerMode, ServerOptions,
};
use crate::session::Shutdown;

/// Run a dev session until Ctrl+C or until the build executor goes away.
#[cfg(unix)]
pub fn run_dev(config: Config) -> Result<()> {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::channel::{FifoPair, ServerEnd};
    use crate::coordinator::{BuildLink, BuildPaths, Coordinator, CoordinatorExit, ExecutorProcess};
    use crate::server::CHANNEL_BUFFER;
    use crate::session::Session;
    use crate::watch::{DebounceTiming, WatchActor};

    let session = Session::new(config)?;
    let shutdown = session.shutdown.clone();
    shutdown.install_signal_handler()?;
    let config = Arc::clone(&session.config);
    let grace = Duration::from_millis(config.dev.shutdown_grace_ms);

    let pair = Arc::new(
        FifoPair::create(session.request_fifo_path(), session.response_fifo_path())
            .context("Failed to create the build channel")?,
    );
    let executor = ExecutorProcess::spawn(&session)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let guard = runtime.enter();

    let server = match LiveServer::start(server_options(&config), &shutdown) {
        Ok(server) => server,
        Err(e) => {
            shutdown.cancel();
            let _ = executor.terminate(grace);
            return Err(e);
        }
    };

    let (coord_tx, coord_rx) = mpsc::channel(CHANNEL_BUFFER);
    let link = {
        let pair = Arc::clone(&pair);
        let shutdown = shutdown.clone();
        let liveness = executor.liveness();
        BuildLink::spawn(
            move || ServerEnd::connect(&pair, &shutdown, liveness),
            BuildPaths {
                log: session.build_log_path(),
                artifact: config.build.artifact_path(),
            },
            coord_tx.clone(),
        )
    };
    let coordinator = Coordinator::new(coord_rx, link, server.hub_sender(), shutdown.clone(), grace);

    match WatchActor::new(
        watch_paths(&config),
        vec![config.build.manifest_dir.join("target")],
        DebounceTiming::from_config(&config.dev),
        coord_tx,
        shutdown.clone(),
    ) {
        Ok(watcher) => {
            runtime.spawn(watcher.run());
        }
        Err(e) => log!("watch"; "file watching disabled: {}", e),
    }

    let client_log = spawn_client_log(server.events(), shutdown.clone());

    if !config.dev.skip_auto_open
        && let Err(e) = crate::utils::platform::open_browser(server.url())
    {
        log!("serve"; "failed to open browser: {:#}", e);
    }

    let exit = runtime.block_on(coordinator.run());

    // Teardown: the coordinator already waited for the in-flight build
    shutdown.cancel();
    crate::logger::status_detach();
    if let Err(e) = executor.terminate(grace) {
        log!("error"; "{:#}", e);
    }
    if let Err(e) = server.wait() {
        crate::debug!("serve"; "{:#}", e);
    }
    let _ = client_log.join();
    drop(guard);
    runtime.shutdown_timeout(Duration::from_secs(1));
    drop(pair);

    match exit {
        CoordinatorExit::Cancelled => Ok(()),
        CoordinatorExit::ChannelClosed => {
            anyhow::bail!("build executor exited unexpectedly; dev session ended")
        }
    }
}

#[cfg(not(unix))]
pub fn run_dev(_config: Config) -> Result<()> {
    Err(crate::channel::ChannelError::Unsupported.into())
}

fn server_options(config: &Config) -> ServerOptions {
    let dev = &config.dev;
    ServerOptions {
        bind: dev.bind,
        port: dev.port,
        host: dev.host(),
        ws_port: dev.ws_port,
        mode: ServerMode::Dev,
        title: config.build.product_name(),
        artifact: config.build.artifact_path(),
        resources: dev.resources.clone(),
        custom_index_page: dev.custom_index_page.clone(),
    }
}

/// Watched roots: the configured paths plus the package manifest.
fn watch_paths(config: &Config) -> Vec<PathBuf> {
    let mut paths = config.dev.watch_paths.clone();
    let manifest = config.build.manifest_dir.join("Cargo.toml");
    if !paths.contains(&manifest) {
        paths.push(manifest);
    }
    paths
}

/// Print what browsers report until the session ends.
fn spawn_client_log(events: Receiver<ClientMessage>, shutdown: Shutdown) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.is_cancelled() {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(message) => print_client_message(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

fn print_client_message(message: ClientMessage) {
    match message.payload {
        ClientPayload::Output(chunk) => {
            let module = match chunk.stream {
                OutputStream::Stdout => "stdout",
                OutputStream::Stderr => "stderr",
            };
            for line in chunk.text.lines() {
                log!(module; "{}", line);
            }
        }
        ClientPayload::Event(ClientEvent::StackTrace { stack_trace }) => {
            let format = message
                .format
                .unwrap_or_else(|| TraceFormat::detect(&stack_trace));
            crate::logger::print_block(&format_stack_trace(&stack_trace, format));
        }
        ClientPayload::Event(ClientEvent::TestRunOutput { output }) => {
            for line in output.lines() {
                log!("stdout"; "{}", line);
            }
        }
        ClientPayload::Event(ClientEvent::TestPassed) => {
            crate::debug!("ws"; "client {} reported success", message.client);
        }
        ClientPayload::Event(ClientEvent::ErrorReport { report }) => {
            log!("error"; "{}", report);
        }
    }
}
