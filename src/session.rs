//! Per-session state.
//!
//! A [`Session`] owns what one `dev` or `test` invocation shares between its
//! components: the resolved configuration, the cancellation token and the
//! scratch directory holding the FIFOs and the build log. Components receive
//! clones of what they need at construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::config::Config;

type CancelHook = Box<dyn FnOnce() + Send>;

struct ShutdownInner {
    cancelled: AtomicBool,
    notify: Notify,
    hooks: Mutex<Vec<CancelHook>>,
}

/// Cancellation token shared by every component of a session.
///
/// Cancelling runs the registered hooks once (e.g. unblocking the HTTP
/// server) and wakes every task awaiting [`Shutdown::cancelled`].
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.notify.notify_waiters();
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Run `hook` on cancellation, or right away if already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut hooks = self.inner.hooks.lock();
            if !self.is_cancelled() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Resolve once the session is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Route Ctrl+C, SIGTERM and SIGHUP to this token, so a `kill` goes
    /// through the same teardown as Ctrl+C. Process-wide; install once.
    pub fn install_signal_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            crate::log!("serve"; "shutting down...");
            token.cancel();
        })
        .map_err(|e| anyhow::anyhow!("failed to set signal handler: {}", e))
    }
}

/// State owned by one dev or test session.
pub struct Session {
    pub config: Arc<Config>,
    pub shutdown: Shutdown,
    scratch: TempDir,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("wasmdev-")
            .tempdir()
            .context("Failed to create session directory")?;
        crate::debug!("session"; "scratch dir: {}", scratch.path().display());

        Ok(Self {
            config: Arc::new(config),
            shutdown: Shutdown::new(),
            scratch,
        })
    }

    /// Scratch directory, removed when the session is dropped.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn build_log_path(&self) -> PathBuf {
        self.scratch.path().join("build.log")
    }

    pub fn request_fifo_path(&self) -> PathBuf {
        self.scratch.path().join("build-request")
    }

    pub fn response_fifo_path(&self) -> PathBuf {
        self.scratch.path().join("build-response")
    }
}
