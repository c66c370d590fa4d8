//! Build link: the thread that owns the channel's server end.
//!
//! Channel I/O blocks, so it lives on its own thread. The coordinator sends
//! [`LinkCommand::Build`] over a crossbeam channel; results come back as
//! [`CoordinatorMsg`]s on the coordinator's mailbox.

use std::fs;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::mpsc;

use super::{BuildOutcome, CoordinatorMsg};
use crate::channel::{BuildTransport, ChannelError};

pub enum LinkCommand {
    /// Write one request and wait for its response
    Build,
}

/// Where the executor leaves its results.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Compiler output of the latest build
    pub log: PathBuf,
    pub artifact: PathBuf,
}

/// Handle to a running build link.
///
/// Dropping it ends the thread once the current build has answered, which
/// closes the request side of the channel.
pub struct BuildLink {
    commands: Sender<LinkCommand>,
    _handle: JoinHandle<()>,
}

impl BuildLink {
    /// Start the link thread. `connect` runs on it, so a slow executor
    /// start does not stall the coordinator.
    pub fn spawn<T, F>(connect: F, paths: BuildPaths, replies: mpsc::Sender<CoordinatorMsg>) -> Self
    where
        T: BuildTransport,
        F: FnOnce() -> Result<T, ChannelError> + Send + 'static,
    {
        let (commands, rx) = channel::unbounded();
        let handle = thread::spawn(move || run(connect, &rx, &paths, &replies));
        Self {
            commands,
            _handle: handle,
        }
    }

    /// Ask for one build. `false` when the link has already stopped.
    pub fn request(&self) -> bool {
        self.commands.send(LinkCommand::Build).is_ok()
    }
}

fn run<T, F>(
    connect: F,
    commands: &Receiver<LinkCommand>,
    paths: &BuildPaths,
    replies: &mpsc::Sender<CoordinatorMsg>,
) where
    T: BuildTransport,
    F: FnOnce() -> Result<T, ChannelError>,
{
    let mut transport = match connect() {
        Ok(transport) => transport,
        Err(e) => {
            let _ = replies.blocking_send(CoordinatorMsg::LinkClosed(e));
            return;
        }
    };

    while let Ok(LinkCommand::Build) = commands.recv() {
        let reply = match build_once(&mut transport, paths) {
            Ok(outcome) => CoordinatorMsg::Finished(outcome),
            // A garbled byte fails this build; the executor is still there
            Err(ChannelError::BrokenResponse(byte)) => {
                let text = format!(
                    "{}\n{}",
                    ChannelError::BrokenResponse(byte),
                    read_log(paths)
                );
                CoordinatorMsg::Finished(BuildOutcome::failed(text))
            }
            Err(e) => {
                let _ = replies.blocking_send(CoordinatorMsg::LinkClosed(e));
                return;
            }
        };
        if replies.blocking_send(reply).is_err() {
            return; // Coordinator stopped
        }
    }
    crate::debug!("channel"; "build link stopped");
}

fn build_once<T: BuildTransport>(
    transport: &mut T,
    paths: &BuildPaths,
) -> Result<BuildOutcome, ChannelError> {
    transport.send_request()?;
    let succeeded = transport.await_response()?;
    Ok(BuildOutcome {
        succeeded,
        log_text: read_log(paths),
        artifact_path: succeeded.then(|| paths.artifact.clone()),
    })
}

fn read_log(paths: &BuildPaths) -> String {
    fs::read_to_string(&paths.log).unwrap_or_default()
}
