use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::types::ChangeKind;
use crate::config::{DevConfig, normalize_path};

/// Quiet period and minimum spacing between triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTiming {
    pub debounce: Duration,
    pub cooldown: Duration,
}

impl DebounceTiming {
    pub fn from_config(dev: &DevConfig) -> Self {
        Self {
            debounce: Duration::from_millis(dev.debounce_ms),
            cooldown: Duration::from_millis(dev.cooldown_ms),
        }
    }
}

/// Pure debouncer: only handles timing and event deduplication.
pub(super) struct Debouncer {
    pub(super) timing: DebounceTiming,
    /// Paths under these prefixes never trigger (build output)
    ignored: Vec<PathBuf>,
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    pub(super) changes: FxHashMap<PathBuf, ChangeKind>,
    pub(super) last_event: Option<Instant>,
    pub(super) last_trigger: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new(timing: DebounceTiming, ignored: Vec<PathBuf>) -> Self {
        Self {
            timing,
            ignored: ignored.iter().map(|p| normalize_path(p)).collect(),
            changes: FxHashMap::default(),
            last_event: None,
            last_trigger: None,
        }
    }

    /// Add a notify event, applying dedup rules:
    /// - Remove + Create/Modify → Create/Modify (file was restored)
    /// - Create/Modify + Remove → Remove (file was deleted)
    /// - Same type events: first event wins
    pub(super) fn add_event(&mut self, event: &notify::Event) {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(modify) => {
                // Metadata-only changes (mtime/atime/chmod) would loop with the build
                if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                    return;
                }
                ChangeKind::Modified
            }
            _ => return,
        };

        crate::debug!("watch"; "raw notify: {:?} {:?}", event.kind, event.paths);

        for path in &event.paths {
            if is_temp_file(path) {
                continue;
            }

            let path = normalize_path(path);
            if self.is_ignored(&path) {
                continue;
            }

            if let Some(&existing) = self.changes.get(&path) {
                match (existing, kind) {
                    (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                        crate::debug!("watch"; "restore {}->{}: {}", existing.label(), kind.label(), path.display());
                        self.changes.insert(path, kind);
                    }
                    (ChangeKind::Modified, ChangeKind::Removed) => {
                        crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                        self.changes.insert(path, ChangeKind::Removed);
                    }
                    (ChangeKind::Created, ChangeKind::Removed) => {
                        crate::debug!("watch"; "discard created+removed: {}", path.display());
                        self.changes.remove(&path);
                    }
                    _ => continue,
                }
                self.last_event = Some(Instant::now());
                continue;
            }

            crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
            self.last_event = Some(Instant::now());
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Take collapsed changes once the quiet period and cooldown elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<(PathBuf, ChangeKind)>> {
        if !self.is_ready() {
            return None;
        }

        let changes = std::mem::take(&mut self.changes);
        self.last_event = None;

        if changes.is_empty() {
            return None;
        }

        self.last_trigger = Some(Instant::now());
        let mut changes: Vec<_> = changes.into_iter().collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        Some(changes)
    }

    pub(super) fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };

        if last_event.elapsed() < self.timing.debounce {
            return false;
        }

        if let Some(last_trigger) = self.last_trigger
            && last_trigger.elapsed() < self.timing.cooldown
        {
            return false;
        }

        !self.changes.is_empty()
    }

    /// Precise sleep duration until next possible ready time.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        let debounce_remaining = self.timing.debounce.saturating_sub(last_event.elapsed());

        let cooldown_remaining = self
            .last_trigger
            .map(|t| self.timing.cooldown.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);

        debounce_remaining
            .max(cooldown_remaining)
            .max(Duration::from_millis(1))
    }
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
        || name.starts_with('#')
}
