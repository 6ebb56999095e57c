//! Integration tests for the content-addressable index and sync engine.

use atelier_library::{Hasher, SyncEngine, SourceKind, Workspace};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn workspace() -> (TempDir, Workspace) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let ws = Workspace::init(dir.path()).unwrap();
    (dir, ws)
}

fn write_model(models: &Path, relative: &str, bytes: &[u8]) {
    let path = models.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/sd15.safetensors", b"checkpoint bytes");
    write_model(&models, "vae/kl-f8.pt", b"vae bytes");

    let first = ws.sync_index().await.unwrap();
    assert_eq!(first.created, 2);
    assert!(first.errors.is_empty());

    let second = ws.sync_index().await.unwrap();
    assert!(second.is_noop(), "second sync must be a no-op: {:?}", second);
    assert_eq!(second.unchanged, 2);
}

#[tokio::test]
async fn test_identical_files_collapse_to_one_record() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/original.safetensors", b"same bytes");
    write_model(&models, "loras/copy.safetensors", b"same bytes");

    let report = ws.sync_index().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.merged, 1);

    let duplicates = ws.duplicate_models().unwrap();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].locations.len(), 2);
    assert_eq!(ws.index_stats().unwrap().record_count, 1);
}

#[tokio::test]
async fn test_deleting_only_file_prunes_record() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/gone.safetensors", b"doomed bytes");

    ws.sync_index().await.unwrap();
    assert_eq!(ws.index_stats().unwrap().record_count, 1);

    fs::remove_file(models.join("checkpoints/gone.safetensors")).unwrap();
    let report = ws.sync_index().await.unwrap();
    assert_eq!(report.removed_locations, 1);
    assert_eq!(report.deleted_records, 1);
    assert_eq!(ws.index_stats().unwrap().record_count, 0);
}

#[tokio::test]
async fn test_record_with_source_survives_deletion() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/keep.safetensors", b"sourced bytes");

    ws.sync_index().await.unwrap();
    let hash = ws.find_models("keep").unwrap()[0].hash.clone();
    ws.add_model_source(&hash, SourceKind::Url, "https://example.com/keep.safetensors")
        .unwrap();

    fs::remove_file(models.join("checkpoints/keep.safetensors")).unwrap();
    let report = ws.sync_index().await.unwrap();
    assert_eq!(report.removed_locations, 1);
    assert_eq!(report.deleted_records, 0);

    // Known but absent: zero locations, source retained for re-download.
    let record = ws.show_model(&hash).unwrap();
    assert!(record.locations.is_empty());
    assert_eq!(record.sources.len(), 1);
}

#[tokio::test]
async fn test_engineered_collision_resolves_to_two_records() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();

    // Two 10 KB files sharing the sampled regions (4 KB head and tail)
    // and size, differing only in the middle.
    let mut bytes_a = vec![0u8; 10 * 1024];
    let mut bytes_b = bytes_a.clone();
    bytes_a[5 * 1024] = 1;
    bytes_b[5 * 1024] = 2;
    write_model(&models, "checkpoints/twin-a.safetensors", &bytes_a);
    write_model(&models, "checkpoints/twin-b.safetensors", &bytes_b);

    let engine = SyncEngine::new(ws.index().clone()).with_hasher(Hasher::with_sample_len(4 * 1024));
    let report = engine.sync(&models).await.unwrap();

    // Strong-hash arbitration must keep them apart, never merge them.
    assert_eq!(report.created, 2, "collision was merged: {:?}", report);
    assert_eq!(report.merged, 0);

    let stats = ws.index_stats().unwrap();
    assert_eq!(stats.record_count, 2);
    let page = ws.list_models(10, None).unwrap();
    assert_eq!(page.records.len(), 2);
    // Both records share the quick hash; identities diverge.
    assert_eq!(page.records[0].quick_hash, page.records[1].quick_hash);
    assert_ne!(page.records[0].hash, page.records[1].hash);
}

#[tokio::test]
async fn test_mtime_drift_with_same_content_reports_unchanged() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    let path = models.join("checkpoints/stable.safetensors");
    write_model(&models, "checkpoints/stable.safetensors", b"stable bytes");
    ws.sync_index().await.unwrap();

    // Rewrite identical content; the mtime moves, the bytes do not.
    fs::write(&path, b"stable bytes").unwrap();
    let report = ws.sync_index().await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.merged, 0);
    assert_eq!(ws.index_stats().unwrap().record_count, 1);
}

#[tokio::test]
async fn test_changed_content_moves_location_to_new_record() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    let path = models.join("checkpoints/mutable.safetensors");
    write_model(&models, "checkpoints/mutable.safetensors", b"version one");
    ws.sync_index().await.unwrap();
    let old_hash = ws.find_models("mutable").unwrap()[0].hash.clone();

    fs::write(&path, b"version two, rather different").unwrap();
    ws.sync_index().await.unwrap();

    let record = ws.find_models("mutable").unwrap().remove(0);
    assert_ne!(record.hash, old_hash);
    // The old record lost its only location and had no sources.
    assert!(ws.index().lookup(&old_hash).unwrap().is_none());
    assert_eq!(ws.index_stats().unwrap().record_count, 1);
}

#[tokio::test]
async fn test_scan_directory_is_additive() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/inside.safetensors", b"inside bytes");
    ws.sync_index().await.unwrap();

    // A side collection outside the workspace models directory.
    let side = TempDir::new().unwrap();
    write_model(side.path(), "loras/outside.safetensors", b"outside bytes");
    let report = ws.scan_directory(side.path()).await.unwrap();
    assert_eq!(report.created, 1);

    // Scanning the side tree again after emptying it removes only its own
    // locations; the workspace records stay.
    fs::remove_file(side.path().join("loras/outside.safetensors")).unwrap();
    ws.scan_directory(side.path()).await.unwrap();
    assert_eq!(ws.find_models("inside").unwrap().len(), 1);
    assert!(ws.find_models("outside").unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_and_partial_files_do_not_poison_sync() {
    let (_dir, ws) = workspace();
    let models = ws.models_dir();
    write_model(&models, "checkpoints/good.safetensors", b"good bytes");
    write_model(&models, "checkpoints/empty.safetensors", b"");
    write_model(&models, "checkpoints/wip.safetensors.part", b"partial");

    let report = ws.sync_index().await.unwrap();
    // The good file lands, the empty one is a per-file error, the partial
    // download is filtered out before hashing.
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(ws.index_stats().unwrap().record_count, 1);
}
