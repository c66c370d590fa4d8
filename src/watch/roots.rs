use std::path::PathBuf;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;

use super::types::WatchError;

/// Watch-root consistency manager.
///
/// Roots that do not exist yet are tolerated; they are attached once they
/// appear. A root that disappears is reported and re-attached on return.
pub(super) struct WatchRoots {
    desired: Vec<PathBuf>,
    attached: FxHashSet<PathBuf>,
}

impl WatchRoots {
    pub(super) fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            desired: paths,
            attached: FxHashSet::default(),
        }
    }

    pub(super) fn attach_existing(&mut self, watcher: &mut RecommendedWatcher) {
        for path in &self.desired {
            if !path.exists() {
                crate::debug!("watch"; "not yet present: {}", path.display());
                continue;
            }
            match watcher.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    self.attached.insert(path.clone());
                }
                Err(e) => {
                    crate::log!("watch"; "{}: {}", WatchError::RootUnavailable(path.clone()), e);
                }
            }
        }
    }

    /// Detach vanished roots and attach the ones that appeared since the
    /// last call. Returns the newly attached roots.
    pub(super) fn maintain(&mut self, watcher: &mut RecommendedWatcher) -> Vec<PathBuf> {
        // Drop stale handles for roots that no longer exist.
        self.attached.retain(|path| {
            let exists = path.exists();
            if !exists {
                crate::log!("watch"; "{}", WatchError::RootUnavailable(path.clone()));
                let _ = watcher.unwatch(path);
            }
            exists
        });

        let mut appeared = Vec::new();
        for path in &self.desired {
            if self.attached.contains(path) || !path.exists() {
                continue;
            }

            if watcher.watch(path, RecursiveMode::Recursive).is_ok() {
                self.attached.insert(path.clone());
                crate::log!("watch"; "watching {}", path.display());
                appeared.push(path.clone());
            }
        }
        appeared
    }

    pub(super) fn attached_count(&self) -> usize {
        self.attached.len()
    }
}
