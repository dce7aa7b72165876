//! Change ingestion: single-file notifications, the event channel, and
//! full filesystem rescans.
//!
//! The curator does not watch the filesystem itself; the host forwards
//! [`FileEvent`]s from whatever watcher it runs. A full rescan uses scan
//! epochs for deletion detection: every known file is marked Unknown, the
//! walk re-validates what it finds, and whatever stays Unknown afterwards
//! is a confirmed deletion.

use std::path::Path;

use crossbeam_channel::Receiver;
use ignore::WalkBuilder;

use crate::curator::{list_reset_event, Curator, CuratorData};
use crate::error::Result;
use crate::files::file_timestamp;
use crate::types::{ExistenceState, FileEvent};

/// Directory holding the curator's own cache and lookup-table files;
/// excluded from scans and change handling.
pub const CURATOR_DIR: &str = ".curator";

fn in_curator_dir(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == CURATOR_DIR)
}

impl Curator {
    /// Tells the curator that a single file changed or appeared on disk.
    pub fn notify_file_change(&self, path: &Path) {
        self.handle_single_file(path);
    }

    /// Drains all queued file events. `RescanRequired` (watcher overflow)
    /// triggers a full rescan.
    pub fn process_file_events(&self, events: &Receiver<FileEvent>) -> Result<()> {
        let mut rescan = false;
        while let Ok(event) = events.try_recv() {
            match event {
                FileEvent::Changed(path) => self.handle_single_file(&path),
                FileEvent::Removed(path) => {
                    if !in_curator_dir(&path) {
                        self.shared.data.lock().handle_missing_file(&path);
                    }
                }
                FileEvent::RescanRequired => rescan = true,
            }
        }
        if rescan {
            self.check_file_system()?;
        }
        Ok(())
    }

    /// Walks every data root, ingesting all files and detecting deletions.
    pub fn check_file_system(&self) -> Result<()> {
        let roots = &self.shared.config.roots;
        log::info!("scanning {} data root(s)", roots.len());

        self.shared.data.lock().files.begin_scan_epoch();

        for root in roots {
            let walk = WalkBuilder::new(root)
                .standard_filters(false)
                .filter_entry(|entry| entry.file_name() != CURATOR_DIR)
                .build();
            for entry in walk {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        log::warn!("scan error under {}: {err}", root.display());
                        continue;
                    }
                };
                if entry.file_type().map_or(true, |ty| ty.is_dir()) {
                    continue;
                }
                self.handle_single_file(entry.path());
            }
        }

        // Sweep: anything under a root that no observe() re-validated is a
        // confirmed deletion. Entries outside the roots are left alone.
        let unknown = self.shared.data.lock().files.unknown_paths();
        {
            let mut data = self.shared.data.lock();
            for path in &unknown {
                if self.shared.config.root_for_path(path).is_none() {
                    continue;
                }
                data.handle_missing_file(path);
                data.files.remove(path);
            }
        }

        self.broadcast(vec![list_reset_event()]);
        Ok(())
    }

    fn handle_single_file(&self, path: &Path) {
        if in_curator_dir(path) {
            return;
        }

        let fs_meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => {
                self.shared.data.lock().handle_missing_file(path);
                return;
            }
        };
        if fs_meta.is_dir() {
            return;
        }
        let Some(timestamp) = file_timestamp(&fs_meta) else {
            return;
        };

        let changed = {
            let mut data = self.shared.data.lock();
            let changed = data.files.observe(path, timestamp);
            if changed {
                data.invalidate_dependents_of_path(path);
                if let Some(owner) = data.files.get(path).and_then(|entry| entry.owner) {
                    data.invalidate_transform_state(owner);
                }
            }
            changed
        };

        // Only recognized asset documents are parsed; everything else is
        // tracked purely as a potential dependency.
        if changed && self.shared.config.descriptor_for_path(path).is_some() {
            if let Err(err) = self.ensure_asset_info_updated(path) {
                log::error!("cannot ingest asset document {}: {err}", path.display());
            }
        }
    }
}

impl CuratorData {
    /// A previously known file is gone: invalidate its dependents and, if it
    /// was an asset document, retire the asset (destroyed once the removal
    /// has been reported by the tick).
    pub(crate) fn handle_missing_file(&mut self, path: &Path) {
        self.invalidate_dependents_of_path(path);
        if let Some(owner) = self.files.mark_missing(path) {
            log::info!("asset document removed: {}", path.display());
            self.untrack_asset_edges(owner);
            self.set_existence(owner, ExistenceState::Removed);
            self.states.remove(owner);
        }
    }
}
