//! Build Coordinator
//!
//! Serializes rebuilds: at most one request is in flight on the build
//! channel, and any number of triggers during a build collapse into a single
//! follow-up.
//!
//! # Architecture
//!
//! ```text
//! WatchActor --[Trigger]--> Coordinator --[Build]--> build link thread --> channel
//!                               ^   |                      |
//!                               |   +--[Outcome]--> HubActor (push)
//!                               +------[Finished / LinkClosed]-+
//! ```
//!
//! # Module Structure
//!
//! - `state` - pure state machine
//! - `link` - thread owning the blocking channel I/O
//! - `process` - spawning and terminating the executor process
//! - `executor` - the executor side of the channel (runs the compiler)

pub mod executor;
mod link;
mod process;
mod state;


pub use link::{BuildLink, BuildPaths};
pub use process::ExecutorProcess;
use state::BuildState;

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::channel::ChannelError;
use crate::diagnostics::{parse_diagnostics, render_diagnostics};
use crate::logger::{status_error, status_pending, status_success};
use crate::server::HubMsg;
use crate::session::Shutdown;
use crate::utils::plural::plural_count;

/// Log text of the outcome reported when the executor is gone.
pub const CHANNEL_CLOSED_TEXT: &str = "<channel closed>";

/// Result of one build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub succeeded: bool,
    pub log_text: String,
    pub artifact_path: Option<PathBuf>,
}

impl BuildOutcome {
    pub fn failed(log_text: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            log_text: log_text.into(),
            artifact_path: None,
        }
    }

    pub fn channel_closed() -> Self {
        Self::failed(CHANNEL_CLOSED_TEXT)
    }
}

/// Coordinator mailbox.
#[derive(Debug)]
pub enum CoordinatorMsg {
    /// Files changed; rebuild
    Trigger { changed: Vec<PathBuf> },
    /// The in-flight build answered
    Finished(BuildOutcome),
    /// The channel is unusable; no further builds are possible
    LinkClosed(ChannelError),
}

/// Why the coordinator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// The executor went away; the session must end
    ChannelClosed,
    /// The session was cancelled
    Cancelled,
}

/// Build coordinator actor.
pub struct Coordinator {
    rx: mpsc::Receiver<CoordinatorMsg>,
    link: BuildLink,
    hub_tx: mpsc::Sender<HubMsg>,
    state: BuildState,
    shutdown: Shutdown,
    /// Bounded wait on the in-flight build at teardown
    grace: Duration,
}

impl Coordinator {
    pub fn new(
        rx: mpsc::Receiver<CoordinatorMsg>,
        link: BuildLink,
        hub_tx: mpsc::Sender<HubMsg>,
        shutdown: Shutdown,
        grace: Duration,
    ) -> Self {
        Self {
            rx,
            link,
            hub_tx,
            state: BuildState::Idle,
            shutdown,
            grace,
        }
    }

    /// Run until cancelled or until the channel closes. Starts with a build.
    pub async fn run(mut self) -> CoordinatorExit {
        self.on_trigger(&[]);

        let exit = loop {
            let msg = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break CoordinatorExit::Cancelled,
                msg = self.rx.recv() => msg,
            };
            let Some(msg) = msg else {
                break CoordinatorExit::Cancelled;
            };

            match msg {
                CoordinatorMsg::Trigger { changed } => self.on_trigger(&changed),
                CoordinatorMsg::Finished(outcome) => self.on_finished(outcome).await,
                CoordinatorMsg::LinkClosed(ChannelError::Cancelled) => {
                    break CoordinatorExit::Cancelled;
                }
                CoordinatorMsg::LinkClosed(e) => {
                    self.on_link_closed(&e).await;
                    break CoordinatorExit::ChannelClosed;
                }
            }
        };

        if exit == CoordinatorExit::Cancelled {
            self.drain_in_flight().await;
        }
        crate::debug!("build"; "coordinator stopped ({})", self.state.label());
        exit
    }

    fn on_trigger(&mut self, changed: &[PathBuf]) {
        let transition = self.state.on_trigger();
        self.state = transition.next;
        if transition.send_request {
            self.request_build();
        } else {
            crate::debug!("build"; "{} changed during build, follow-up queued", plural_count(changed.len(), "file"));
        }
    }

    async fn on_finished(&mut self, outcome: BuildOutcome) {
        let transition = self.state.on_response();
        self.state = transition.next;

        report(&outcome);
        if self.hub_tx.send(HubMsg::Outcome(outcome)).await.is_err() {
            crate::debug!("build"; "push hub stopped");
        }

        if transition.send_request {
            self.request_build();
        }
    }

    async fn on_link_closed(&mut self, error: &ChannelError) {
        self.state = BuildState::Idle;
        status_error("build executor exited", &error.to_string());
        let _ = self
            .hub_tx
            .send(HubMsg::Outcome(BuildOutcome::channel_closed()))
            .await;
        self.shutdown.cancel();
    }

    fn request_build(&self) {
        status_pending("building...");
        if !self.link.request() {
            // The link reports why it stopped on the mailbox
            crate::debug!("build"; "build link already stopped");
        }
    }

    /// Give the in-flight build up to `grace` to answer.
    async fn drain_in_flight(&mut self) {
        if !self.state.in_flight() {
            return;
        }
        crate::debug!("build"; "waiting up to {:?} for in-flight build", self.grace);
        let rx = &mut self.rx;
        let waited = tokio::time::timeout(self.grace, async {
            while let Some(msg) = rx.recv().await {
                if matches!(msg, CoordinatorMsg::Finished(_) | CoordinatorMsg::LinkClosed(_)) {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            crate::log!("build"; "in-flight build did not finish within {:?}", self.grace);
        }
        self.state = BuildState::Idle;
    }
}

/// Print an outcome to the terminal status block.
fn report(outcome: &BuildOutcome) {
    if outcome.succeeded {
        status_success("build succeeded");
        return;
    }

    let diagnostics = parse_diagnostics(&outcome.log_text);
    if diagnostics.is_empty() {
        status_error("build failed", outcome.log_text.trim_end());
        return;
    }

    let tally = crate::diagnostics::compiler::tally(&diagnostics);
    let summary = format!(
        "build failed: {}, {}",
        plural_count(tally.errors, "error"),
        plural_count(tally.warnings, "warning")
    );
    status_error(&summary, render_diagnostics(&diagnostics).trim_end());
}
