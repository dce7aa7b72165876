//! Lookup-table output: a flat id-to-entry file per data root, consumed by
//! the runtime to resolve asset ids without the curator present.
//!
//! Format: UTF-8 lines `<uuid>;<entry>`, one per asset or sub-asset whose
//! manager resolves a non-empty entry. Lines are sorted by id, so the file
//! is deterministic for unchanged inputs.

use std::path::{Path, PathBuf};

use crate::curator::Curator;
use crate::error::Result;
use crate::ingest::CURATOR_DIR;

const TABLE_FILE: &str = "assets.lookup";

fn table_path(root: &Path) -> PathBuf {
    root.join(CURATOR_DIR).join(TABLE_FILE)
}

impl Curator {
    /// Writes the lookup table for every data root, atomically replacing the
    /// previous file.
    pub fn write_lookup_tables(&self) -> Result<()> {
        let tables: Vec<(PathBuf, String)> = {
            let data = self.shared.data.lock();
            self.shared
                .config
                .roots
                .iter()
                .map(|root| {
                    let mut lines: Vec<String> = Vec::new();
                    for id in data.assets.sub_asset_ids() {
                        let Some(main) = data.assets.main_asset_of(id) else {
                            continue;
                        };
                        let Some(info) = data.assets.get(main) else {
                            continue;
                        };
                        if !info.absolute_path.starts_with(root) {
                            continue;
                        }
                        let entry = info
                            .descriptor
                            .manager
                            .lookup_table_entry(id, &info.absolute_path);
                        match entry {
                            Some(entry) if !entry.is_empty() => {
                                lines.push(format!("{id};{entry}\n"));
                            }
                            _ => {}
                        }
                    }
                    lines.sort();
                    (table_path(root), lines.concat())
                })
                .collect()
        };

        for (path, contents) in tables {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let tmp = path.with_extension("lookup.tmp");
            std::fs::write(&tmp, contents.as_bytes())?;
            std::fs::rename(&tmp, &path)?;
            log::debug!("wrote lookup table {}", path.display());
        }
        Ok(())
    }
}
