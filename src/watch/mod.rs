//! File Watcher
//!
//! Watches the configured roots and sends one debounced trigger per burst of
//! changes to the build coordinator. Starts watching immediately, so events
//! that happen during the initial build are buffered rather than lost.
//!
//! ```text
//! notify thread --> Debouncer (timing + dedup) --> CoordinatorMsg::Trigger
//! ```

// Pure timing and deduplication.
mod debouncer;
// Watch root attach/re-attach lifecycle.
mod roots;
// Shared event and error types.
mod types;


pub use debouncer::DebounceTiming;
pub use types::{ChangeKind, WatchError};

use std::path::PathBuf;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::mpsc;

use crate::coordinator::CoordinatorMsg;
use crate::session::Shutdown;
use debouncer::Debouncer;
use roots::WatchRoots;

/// Bridge capacity between the notify thread and the actor.
const EVENT_BUFFER: usize = 64;

/// How often roots are checked for appearing or vanishing. The parent of a
/// missing root is not watched, so its creation produces no event.
const ROOT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// File watcher actor
pub struct WatchActor {
    /// Channel to receive notify events (sync -> async bridge)
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    watcher: RecommendedWatcher,
    watch_roots: WatchRoots,
    debouncer: Debouncer,
    coordinator_tx: mpsc::Sender<CoordinatorMsg>,
    shutdown: Shutdown,
}

impl WatchActor {
    /// Create the watcher and attach every root that exists.
    ///
    /// Missing roots are not an error; they are attached once created.
    /// `ignored` prefixes (the build output directory) never trigger.
    pub fn new(
        paths: Vec<PathBuf>,
        ignored: Vec<PathBuf>,
        timing: DebounceTiming,
        coordinator_tx: mpsc::Sender<CoordinatorMsg>,
        shutdown: Shutdown,
    ) -> Result<Self, WatchError> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        let mut watch_roots = WatchRoots::new(paths);
        watch_roots.attach_existing(&mut watcher);
        crate::debug!("watch"; "{} root(s) attached", watch_roots.attached_count());

        Ok(Self {
            notify_rx,
            watcher,
            watch_roots,
            debouncer: Debouncer::new(timing, ignored),
            coordinator_tx,
            shutdown,
        })
    }

    /// Run until shutdown or until the coordinator stops.
    pub async fn run(self) {
        let notify_rx = self.notify_rx;
        let coordinator_tx = self.coordinator_tx;
        let shutdown = self.shutdown;
        let mut debouncer = self.debouncer;
        let mut watcher = self.watcher;
        let mut watch_roots = self.watch_roots;

        let (async_tx, mut async_rx) = mpsc::channel::<notify::Event>(EVENT_BUFFER);

        // notify only offers a sync callback
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => crate::log!("watch"; "{}", WatchError::from(e)),
                }
            }
        });

        let mut root_check = tokio::time::interval(ROOT_CHECK_INTERVAL);
        root_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = async_rx.recv() => debouncer.add_event(&event),
                _ = root_check.tick() => {
                    // Files written before the watch was attached are covered
                    // by the root's own creation
                    for root in watch_roots.maintain(&mut watcher) {
                        debouncer.add_event(&appeared_event(root));
                    }
                }
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    if emit_trigger(&mut debouncer, &coordinator_tx).await.is_err() {
                        break;
                    }
                }
            }
        }
        crate::debug!("watch"; "stopped");
    }
}

fn appeared_event(root: PathBuf) -> notify::Event {
    use notify::event::{CreateKind, EventKind};
    notify::Event::new(EventKind::Create(CreateKind::Folder)).add_path(root)
}

/// Send one trigger for the collapsed changes, if the window has closed.
///
/// Returns `Err(())` if the coordinator shut down
async fn emit_trigger(
    debouncer: &mut Debouncer,
    coordinator_tx: &mpsc::Sender<CoordinatorMsg>,
) -> Result<(), ()> {
    let Some(changes) = debouncer.take_if_ready() else {
        return Ok(());
    };

    log_changes(&changes);
    let changed = changes.into_iter().map(|(path, _)| path).collect();
    coordinator_tx
        .send(CoordinatorMsg::Trigger { changed })
        .await
        .map_err(|_| ())
}

fn log_changes(changes: &[(PathBuf, ChangeKind)]) {
    match changes {
        [(path, kind)] => {
            crate::log!("watch"; "{} {}", kind.label(), path.display());
        }
        _ => {
            crate::log!("watch"; "{} files changed", changes.len());
            for (path, kind) in changes {
                crate::debug!("watch"; "  {} {}", kind.label(), path.display());
            }
        }
    }
}
