//! End-to-end curator tests against a real temp directory, using a small
//! text document format ("doc" files) and in-memory transform oracles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tempfile::TempDir;
use uuid::Uuid;

use curator::{
    AssetId, AssetTypeFlags, AssetTypeManager, Curator, CuratorConfig, CuratorError, CuratorEvent,
    CuratorEventKind, DocumentMetadata, FileEvent, SubAssetData, TransformState,
};

/// Test document type: a text file of `key=value` lines.
struct DocManager {
    flags: AssetTypeFlags,
    /// Asset hashes whose transform output is considered current.
    transformed: Mutex<HashSet<u64>>,
    /// Thumbnail hashes considered current.
    thumbnails: Mutex<HashSet<u64>>,
    parses: AtomicUsize,
    /// Invoked from the output oracle, off-lock; used to simulate a change
    /// racing a recomputation.
    on_output_check: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl DocManager {
    fn new(flags: AssetTypeFlags) -> Arc<Self> {
        Arc::new(Self {
            flags,
            transformed: Mutex::new(HashSet::new()),
            thumbnails: Mutex::new(HashSet::new()),
            parses: AtomicUsize::new(0),
            on_output_check: Mutex::new(None),
        })
    }

    fn mark_transformed(&self, asset_hash: u64) {
        self.transformed.lock().insert(asset_hash);
    }

    fn mark_thumbnail(&self, thumbnail_hash: u64) {
        self.thumbnails.lock().insert(thumbnail_hash);
    }

    fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl AssetTypeManager for DocManager {
    fn type_name(&self) -> &str {
        "Doc"
    }

    fn file_extension(&self) -> &str {
        "doc"
    }

    fn flags(&self) -> AssetTypeFlags {
        self.flags
    }

    fn read_document_metadata(&self, path: &Path) -> curator::Result<DocumentMetadata> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let text = std::fs::read_to_string(path)?;
        let mut id = None;
        let mut settings = 0u64;
        let mut deps = Vec::new();
        let mut refs = Vec::new();
        let mut subs = Vec::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "id" => {
                    id = Some(
                        Uuid::parse_str(value)
                            .map_err(|err| CuratorError::Document(err.to_string()))?,
                    );
                }
                "settings" => {
                    settings = value
                        .parse()
                        .map_err(|_| CuratorError::Document(value.to_string()))?;
                }
                "dep" => deps.push(value.to_string()),
                "ref" => refs.push(value.to_string()),
                "sub" => {
                    let (sub_id, name) = value
                        .split_once(':')
                        .ok_or_else(|| CuratorError::Document(value.to_string()))?;
                    subs.push(SubAssetData {
                        id: Uuid::parse_str(sub_id)
                            .map_err(|err| CuratorError::Document(err.to_string()))?,
                        name: name.to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(DocumentMetadata {
            id: id.ok_or_else(|| CuratorError::Document("missing id".into()))?,
            type_name: "Doc".into(),
            settings_hash: settings,
            transform_dependencies: deps,
            runtime_references: refs,
            outputs: Vec::new(),
            sub_assets: subs,
        })
    }

    fn output_path(&self, source: &Path, _tag: &str) -> PathBuf {
        source.with_extension("out")
    }

    fn is_output_up_to_date(&self, _source: &Path, _outputs: &[String], asset_hash: u64) -> bool {
        if let Some(hook) = self.on_output_check.lock().as_ref() {
            hook();
        }
        self.transformed.lock().contains(&asset_hash)
    }

    fn is_thumbnail_up_to_date(
        &self,
        _source: &Path,
        thumbnail_hash: u64,
        _type_version: u32,
    ) -> bool {
        self.thumbnails.lock().contains(&thumbnail_hash)
    }

    fn lookup_table_entry(&self, _id: AssetId, source: &Path) -> Option<String> {
        source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

struct Fixture {
    temp: TempDir,
    curator: Curator,
    manager: Arc<DocManager>,
    events: Receiver<CuratorEvent>,
}

impl Fixture {
    fn new(flags: AssetTypeFlags) -> Self {
        let temp = TempDir::new().unwrap();
        let manager = DocManager::new(flags);
        let mut config = CuratorConfig::new(vec![temp.path().to_path_buf()]);
        config.register_type(manager.clone());
        let curator = Curator::new(config);
        // Keep recomputation on the test thread.
        curator.pause_updates();
        let events = curator.subscribe();
        Self {
            temp,
            curator,
            manager,
            events,
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn write_doc(&self, name: &str, id: Uuid, settings: u64, lines: &[String]) -> PathBuf {
        let path = self.root().join(name);
        let mut text = format!("id={id}\nsettings={settings}\n");
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        // Separate mtimes for successive writes of the same file.
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&path, text).unwrap();
        path
    }

    fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn drain_events(&self) -> Vec<CuratorEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn dep(value: &str) -> String {
    format!("dep={value}")
}

fn reference(value: &str) -> String {
    format!("ref={value}")
}

#[test]
fn scan_discovers_assets_and_reports_them() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[]);

    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();

    let events = fx.drain_events();
    assert!(events
        .iter()
        .any(|e| e.kind == CuratorEventKind::AssetListReset));
    let added: Vec<_> = events
        .iter()
        .filter(|e| e.kind == CuratorEventKind::AssetAdded)
        .collect();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].asset_id, id);

    let snap = fx.curator.find_asset(&id.to_string()).unwrap();
    assert!(snap.is_main);
    assert_eq!(snap.absolute_path, fx.root().join("a.doc"));
    assert_eq!(fx.curator.find_asset("a.doc").unwrap().id, id);
}

#[test]
fn transform_state_follows_output_oracle() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 7, &[]);
    fx.curator.check_file_system().unwrap();

    let (state, asset_hash, thumb_hash) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::NeedsTransform);
    // No dependencies: both hashes are exactly the settings hash.
    assert_eq!(asset_hash, 7);
    assert_eq!(thumb_hash, 7);

    // A repeated query hits the cached state without recomputing.
    assert_eq!(
        fx.curator.get_transform_state(id),
        Some((TransformState::NeedsTransform, 7, 7))
    );

    fx.manager.mark_transformed(asset_hash);
    fx.curator.notify_asset_change(id);
    let (state, _, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::UpToDate);
}

#[test]
fn missing_dependency_wins_over_missing_reference() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc(
        "a.doc",
        id,
        1,
        &[dep("nowhere.png"), reference("alsonowhere.png")],
    );
    fx.curator.check_file_system().unwrap();

    let (state, asset_hash, thumb_hash) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::MissingDependency);
    assert_eq!(asset_hash, 0);
    assert_eq!(thumb_hash, 0);
}

#[test]
fn missing_reference_blocks_thumbnail_hash_only() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_file("base.png", b"pixels");
    fx.write_doc("a.doc", id, 1, &[dep("base.png"), reference("gone.png")]);
    fx.curator.check_file_system().unwrap();

    let (state, asset_hash, thumb_hash) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::MissingReference);
    assert_ne!(asset_hash, 0);
    assert_eq!(thumb_hash, 0);
}

#[test]
fn missing_dependency_heals_when_file_appears() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[dep("late.png")]);
    fx.curator.check_file_system().unwrap();

    let (state, _, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::MissingDependency);

    let late = fx.write_file("late.png", b"finally");
    fx.curator.notify_file_change(&late);

    let (state, asset_hash, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::NeedsTransform);
    assert_ne!(asset_hash, 0);
}

#[test]
fn dependency_content_change_invalidates() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let base = fx.write_file("base.png", b"v1");
    fx.write_doc("a.doc", id, 1, &[dep("base.png")]);
    fx.curator.check_file_system().unwrap();

    let (_, first_hash, _) = fx.curator.update_asset_state(id);
    fx.manager.mark_transformed(first_hash);
    fx.curator.notify_asset_change(id);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::UpToDate
    );

    fx.write_file("base.png", b"v2 with more bytes");
    fx.curator.notify_file_change(&base);

    let (state, second_hash, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::NeedsTransform);
    assert_ne!(second_hash, first_hash);
}

#[test]
fn thumbnail_staleness_maps_to_flags() {
    // Separate thumbnail generation: stale thumbnail is its own state.
    let fx = Fixture::new(AssetTypeFlags::SUPPORTS_THUMBNAIL);
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 3, &[]);
    fx.curator.check_file_system().unwrap();

    let (_, asset_hash, thumb_hash) = fx.curator.update_asset_state(id);
    fx.manager.mark_transformed(asset_hash);
    fx.curator.notify_asset_change(id);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::NeedsThumbnail
    );

    fx.manager.mark_thumbnail(thumb_hash);
    fx.curator.notify_asset_change(id);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::UpToDate
    );

    // Thumbnail produced by the transform itself: stale thumbnail means
    // re-transform.
    let fx = Fixture::new(AssetTypeFlags::AUTO_THUMBNAIL_ON_TRANSFORM);
    let id = Uuid::new_v4();
    fx.write_doc("b.doc", id, 3, &[]);
    fx.curator.check_file_system().unwrap();

    let (_, asset_hash, _) = fx.curator.update_asset_state(id);
    fx.manager.mark_transformed(asset_hash);
    fx.curator.notify_asset_change(id);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::NeedsTransform
    );
}

#[test]
fn uuid_dependency_folds_dependency_hashes() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    fx.write_doc("a.doc", a, 1, &[]);
    fx.write_doc("b.doc", b, 2, &[dep(&a.to_string())]);
    fx.curator.check_file_system().unwrap();

    let (state, asset_hash, thumb_hash) = fx.curator.update_asset_state(b);
    assert_eq!(state, TransformState::NeedsTransform);
    // b's settings (2) plus a's asset hash (its settings, 1).
    assert_eq!(asset_hash, 3);
    assert_eq!(thumb_hash, 3);

    // A settings change in a must reach b through the inverse map.
    fx.write_doc("a.doc", a, 5, &[]);
    fx.curator.notify_file_change(&fx.root().join("a.doc"));
    let (_, asset_hash, _) = fx.curator.update_asset_state(b);
    assert_eq!(asset_hash, 7);
}

#[test]
fn uuid_dependency_declared_before_target_exists() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    // Only b exists at first; its UUID edge is parked.
    fx.write_doc("b.doc", b, 2, &[dep(&a.to_string())]);
    fx.curator.check_file_system().unwrap();
    assert_eq!(
        fx.curator.update_asset_state(b).0,
        TransformState::MissingDependency
    );

    let a_path = fx.write_doc("a.doc", a, 1, &[]);
    fx.curator.notify_file_change(&a_path);
    assert_eq!(fx.curator.update_asset_state(b).1, 3);

    // The parked edge was grafted: changing a now invalidates b.
    fx.write_doc("a.doc", a, 10, &[]);
    fx.curator.notify_file_change(&a_path);
    assert_eq!(fx.curator.update_asset_state(b).1, 12);
}

#[test]
fn removed_document_retires_the_asset() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let path = fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();
    fx.drain_events();

    std::fs::remove_file(&path).unwrap();
    fx.curator.notify_file_change(&path);
    fx.curator.main_thread_tick();

    let events = fx.drain_events();
    assert!(events
        .iter()
        .any(|e| e.kind == CuratorEventKind::AssetRemoved && e.asset_id == id));
    assert!(fx.curator.find_asset(&id.to_string()).is_none());
    assert_eq!(fx.curator.transform_stats().total, 0);
}

#[test]
fn moved_document_keeps_its_identity() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let old_path = fx.write_doc("x.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();
    fx.drain_events();

    let new_path = fx.root().join("y.doc");
    std::fs::rename(&old_path, &new_path).unwrap();
    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();

    let snap = fx.curator.find_asset(&id.to_string()).unwrap();
    assert_eq!(snap.absolute_path, new_path);
    let events = fx.drain_events();
    assert!(!events
        .iter()
        .any(|e| e.kind == CuratorEventKind::AssetRemoved && e.asset_id == id));
}

#[test]
fn sub_assets_follow_the_declared_list() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let sub = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[format!("sub={sub}:lod0")]);
    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();

    let events = fx.drain_events();
    let added: Vec<_> = events
        .iter()
        .filter(|e| e.kind == CuratorEventKind::AssetAdded)
        .collect();
    assert_eq!(added.len(), 2);

    let snap = fx.curator.find_asset(&sub.to_string()).unwrap();
    assert!(!snap.is_main);
    assert_eq!(snap.name, "lod0");
    assert_eq!(snap.parent_id, id);

    // Dropping the sub-asset from the document retires it.
    fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.notify_file_change(&fx.root().join("a.doc"));
    fx.curator.main_thread_tick();

    let events = fx.drain_events();
    assert!(events
        .iter()
        .any(|e| e.kind == CuratorEventKind::AssetRemoved && e.asset_id == sub));
    assert!(fx.curator.find_asset(&sub.to_string()).is_none());
    assert!(fx.curator.find_asset(&id.to_string()).is_some());
}

#[test]
fn rapid_changes_coalesce_into_one_notification() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let path = fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();
    fx.curator.main_thread_tick();
    fx.drain_events();

    fx.write_doc("a.doc", id, 2, &[]);
    fx.curator.notify_file_change(&path);
    fx.write_doc("a.doc", id, 3, &[]);
    fx.curator.notify_file_change(&path);
    fx.curator.main_thread_tick();

    let updated: Vec<_> = fx
        .drain_events()
        .into_iter()
        .filter(|e| e.kind == CuratorEventKind::AssetUpdated && e.asset_id == id)
        .collect();
    assert_eq!(updated.len(), 1);
}

#[test]
fn racing_invalidation_discards_the_computed_state() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();

    // The output oracle runs off-lock; invalidating from inside it models a
    // change landing while the computation is in flight.
    let racer = fx.curator.clone();
    *fx.manager.on_output_check.lock() = Some(Box::new(move || racer.notify_asset_change(id)));

    let (state, _, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::NeedsTransform);
    // The write-back was discarded: the confirmed state is still Unknown.
    assert_eq!(
        fx.curator.get_transform_state(id).map(|(s, _, _)| s),
        Some(TransformState::Unknown)
    );

    // Without the racer the queued recomputation lands.
    *fx.manager.on_output_check.lock() = None;
    fx.curator.resume_updates();
    assert!(fx.curator.process_stale_queue() >= 1);
    assert_eq!(
        fx.curator.get_transform_state(id).map(|(s, _, _)| s),
        Some(TransformState::NeedsTransform)
    );
}

#[test]
fn touching_an_output_requeues_its_producer() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();

    let (_, asset_hash, _) = fx.curator.update_asset_state(id);
    fx.manager.mark_transformed(asset_hash);
    fx.curator.notify_asset_change(id);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::UpToDate
    );

    // The output path is tracked as a back-reference to its producer.
    let out = fx.write_file("a.out", b"transformed bytes");
    fx.curator.notify_file_change(&out);
    fx.curator.resume_updates();
    assert_eq!(fx.curator.process_stale_queue(), 1);
}

#[test]
fn find_all_uses_and_is_referenced() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let base = fx.write_file("base.png", b"pixels");
    let a_path = fx.write_doc("a.doc", a, 1, &[dep("base.png")]);
    fx.write_doc("b.doc", b, 2, &[dep(&a.to_string())]);
    fx.curator.check_file_system().unwrap();

    assert!(fx.curator.is_referenced(&base));
    assert!(!fx.curator.is_referenced(&fx.root().join("unused.png")));

    let direct = fx.curator.find_all_uses(&base, false);
    assert_eq!(direct.into_iter().collect::<Vec<_>>(), vec![a]);

    let transitive = fx.curator.find_all_uses(&base, true);
    assert!(transitive.contains(&a) && transitive.contains(&b));

    // b depends on a via UUID, resolved to a's document path.
    assert!(fx.curator.is_referenced(&a_path));
}

#[test]
fn dropping_an_edge_to_a_removed_asset_clears_the_inverse_map() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let a_path = fx.write_doc("a.doc", a, 1, &[]);
    let b_path = fx.write_doc("b.doc", b, 2, &[dep(&a.to_string())]);
    fx.curator.check_file_system().unwrap();
    assert!(fx.curator.is_referenced(&a_path));

    // a vanishes; b still declares the edge, so a's old path stays
    // referenced for now.
    std::fs::remove_file(&a_path).unwrap();
    fx.curator.notify_file_change(&a_path);
    fx.curator.main_thread_tick();
    assert!(fx.curator.is_referenced(&a_path));

    // b drops the edge; the entry resolved while a was known must go with
    // it, even though the UUID no longer resolves.
    fx.write_doc("b.doc", b, 2, &[]);
    fx.curator.notify_file_change(&b_path);
    assert!(!fx.curator.is_referenced(&a_path));
    assert!(fx.curator.find_all_uses(&a_path, false).is_empty());
}

#[test]
fn unreadable_document_does_not_spin_the_queue() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let path = fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::NeedsTransform
    );

    // The document turns unparsable (no id line). The recompute reports
    // Unknown and drops the stale tag instead of retrying forever.
    fx.write_file("a.doc", b"settings=borked\n");
    fx.curator.notify_file_change(&path);
    assert_eq!(
        fx.curator.update_asset_state(id).0,
        TransformState::Unknown
    );
    fx.curator.resume_updates();
    assert_eq!(fx.curator.process_stale_queue(), 0);

    // The next timestamp change re-queues and recovers.
    fx.write_doc("a.doc", id, 2, &[]);
    fx.curator.notify_file_change(&path);
    let (state, asset_hash, _) = fx.curator.update_asset_state(id);
    assert_eq!(state, TransformState::NeedsTransform);
    assert_eq!(asset_hash, 2);
}

#[test]
fn stats_track_states() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    fx.write_doc("a.doc", a, 1, &[]);
    fx.write_doc("b.doc", b, 2, &[dep("gone.png")]);
    fx.curator.check_file_system().unwrap();

    fx.curator.update_asset_state(a);
    fx.curator.update_asset_state(b);

    let stats = fx.curator.transform_stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.count(TransformState::NeedsTransform), 1);
    assert_eq!(stats.count(TransformState::MissingDependency), 1);
}

#[test]
fn invalidate_assets_in_state_requeues() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    fx.write_doc("a.doc", id, 1, &[]);
    fx.curator.check_file_system().unwrap();

    let (_, asset_hash, _) = fx.curator.update_asset_state(id);
    fx.manager.mark_transformed(asset_hash);
    fx.curator.notify_asset_change(id);
    fx.curator.update_asset_state(id);

    // Simulates a profile change: everything up-to-date gets re-checked.
    fx.curator
        .invalidate_assets_in_state(TransformState::UpToDate);
    fx.curator.resume_updates();
    assert_eq!(fx.curator.process_stale_queue(), 1);
}

#[test]
fn file_event_channel_drives_ingestion() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let id = Uuid::new_v4();
    let path = fx.write_doc("a.doc", id, 1, &[]);

    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(FileEvent::Changed(path.clone())).unwrap();
    fx.curator.process_file_events(&rx).unwrap();
    assert!(fx.curator.find_asset(&id.to_string()).is_some());

    std::fs::remove_file(&path).unwrap();
    tx.send(FileEvent::Removed(path)).unwrap();
    fx.curator.process_file_events(&rx).unwrap();
    fx.curator.main_thread_tick();
    assert!(fx.curator.find_asset(&id.to_string()).is_none());
}

#[test]
fn cache_warm_start_skips_reparsing() {
    let temp = TempDir::new().unwrap();
    let id = Uuid::new_v4();
    let root = temp.path().to_path_buf();

    // First session: ingest, settle, persist.
    {
        let manager = DocManager::new(AssetTypeFlags::empty());
        let mut config = CuratorConfig::new(vec![root.clone()]);
        config.register_type(manager.clone());
        let curator = Curator::new(config);
        curator.pause_updates();

        std::fs::write(&root.join("a.doc"), format!("id={id}\nsettings=4\ndep=base.png\n"))
            .unwrap();
        std::fs::write(root.join("base.png"), b"pixels").unwrap();
        curator.check_file_system().unwrap();
        curator.update_asset_state(id);
        curator.main_thread_tick();
        curator.save_caches().unwrap();
        assert!(manager.parse_count() >= 1);
    }
    assert!(root.join(".curator/index.cache").exists());

    // Second session: unchanged files are adopted from the cache.
    let manager = DocManager::new(AssetTypeFlags::empty());
    let mut config = CuratorConfig::new(vec![root.clone()]);
    config.register_type(manager.clone());
    let curator = Curator::new(config);
    curator.pause_updates();

    curator.load_caches().unwrap();
    curator.check_file_system().unwrap();
    assert_eq!(manager.parse_count(), 0);

    let snap = curator.find_asset(&id.to_string()).unwrap();
    assert_eq!(snap.absolute_path, root.join("a.doc"));
}

#[test]
fn corrupt_cache_is_discarded_and_rebuilt() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().to_path_buf();
    let id = Uuid::new_v4();

    {
        let manager = DocManager::new(AssetTypeFlags::empty());
        let mut config = CuratorConfig::new(vec![root.clone()]);
        config.register_type(manager);
        let curator = Curator::new(config);
        curator.pause_updates();
        std::fs::write(root.join("a.doc"), format!("id={id}\nsettings=4\n")).unwrap();
        curator.check_file_system().unwrap();
        curator.main_thread_tick();
        curator.save_caches().unwrap();
    }

    // Flip the format version byte.
    let cache = root.join(".curator/index.cache");
    let mut bytes = std::fs::read(&cache).unwrap();
    bytes[0] = bytes[0].wrapping_add(1);
    std::fs::write(&cache, bytes).unwrap();

    let manager = DocManager::new(AssetTypeFlags::empty());
    let mut config = CuratorConfig::new(vec![root.clone()]);
    config.register_type(manager.clone());
    let curator = Curator::new(config);
    curator.pause_updates();

    curator.load_caches().unwrap();
    assert!(!cache.exists());
    curator.check_file_system().unwrap();
    assert!(manager.parse_count() >= 1);
    assert!(curator.find_asset(&id.to_string()).is_some());
}

#[test]
fn lookup_table_lists_assets_sorted() {
    let fx = Fixture::new(AssetTypeFlags::empty());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    fx.write_doc("a.doc", a, 1, &[]);
    fx.write_doc("b.doc", b, 2, &[]);
    fx.curator.check_file_system().unwrap();

    fx.curator.write_lookup_tables().unwrap();
    let table = std::fs::read_to_string(fx.root().join(".curator/assets.lookup")).unwrap();

    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 2);
    let mut sorted = lines.clone();
    sorted.sort_unstable();
    assert_eq!(lines, sorted);
    assert!(table.contains(&format!("{a};a.doc")));
    assert!(table.contains(&format!("{b};b.doc")));
}
