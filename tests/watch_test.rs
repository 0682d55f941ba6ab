use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tierdex::indexing::watch::{ChangeKind, WatchWorker};
use tierdex::{Config, ContextService, HashingEmbedder, Result, Settings};

fn service(temp_dir: &TempDir) -> Result<(Arc<ContextService>, PathBuf)> {
    let notes = temp_dir.path().join("notes");
    fs::create_dir_all(&notes)?;
    let notes = fs::canonicalize(&notes)?;

    let mut settings = Settings::default();
    settings.indexing.watch_dirs = vec![notes.to_string_lossy().into_owned()];
    settings.indexing.debounce_secs = 2.0;

    let config = Config::new(Some(temp_dir.path().join("base")))?.with_settings(settings);
    config.init()?;
    let service = ContextService::open_with_embedder(config, Arc::new(HashingEmbedder::new(128)))?;
    Ok((Arc::new(service), notes))
}

/// Two writes 0.5s apart inside a 2s window: only the first is indexed
#[test]
fn test_rapid_modifications_reindex_once() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let (service, notes) = service(&temp_dir)?;
    let file = notes.join("todo.md");
    let mut worker = WatchWorker::new(service.clone(), Duration::from_secs(2));
    let t0 = Instant::now();

    fs::write(&file, "first draft")?;
    worker.handle_event(&file, ChangeKind::Modified, t0);
    fs::write(&file, "second draft")?;
    worker.handle_event(&file, ChangeKind::Modified, t0 + Duration::from_millis(500));

    let results = service.search("draft", "", None, None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "first draft");

    // Once the window has passed the latest content is picked up
    worker.handle_event(&file, ChangeKind::Modified, t0 + Duration::from_secs(3));
    let results = service.search("draft", "", None, None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "second draft");
    Ok(())
}

#[test]
fn test_removed_file_leaves_index() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let (service, notes) = service(&temp_dir)?;
    let file = notes.join("todo.md");
    fs::write(&file, "water the plants")?;
    let mut worker = WatchWorker::new(service.clone(), Duration::from_secs(2));
    let t0 = Instant::now();

    worker.handle_event(&file, ChangeKind::Modified, t0);
    assert_eq!(service.get_stats().total(), 1);

    fs::remove_file(&file)?;
    worker.handle_event(&file, ChangeKind::Removed, t0 + Duration::from_millis(100));
    assert_eq!(service.get_stats().total(), 0);
    assert!(service.indexed_files().is_empty());
    Ok(())
}

#[test]
fn test_worker_survives_failing_file() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let (service, notes) = service(&temp_dir)?;
    let bad = notes.join("bad.md");
    let good = notes.join("good.md");
    fs::write(&bad, [0xff, 0xfe, 0x81])?;
    fs::write(&good, "still indexed")?;
    let mut worker = WatchWorker::new(service.clone(), Duration::from_secs(2));
    let t0 = Instant::now();

    worker.handle_event(&bad, ChangeKind::Modified, t0);
    worker.handle_event(&good, ChangeKind::Modified, t0);
    assert_eq!(service.get_stats().total(), 1);
    Ok(())
}

#[test]
fn test_excluded_paths_are_ignored() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let (service, notes) = service(&temp_dir)?;
    let file = notes.join("node_modules").join("pkg").join("readme.md");
    fs::create_dir_all(file.parent().unwrap())?;
    fs::write(&file, "vendored docs")?;
    let mut worker = WatchWorker::new(service.clone(), Duration::from_secs(2));

    worker.handle_event(&file, ChangeKind::Modified, Instant::now());
    assert_eq!(service.get_stats().total(), 0);
    Ok(())
}

#[test]
fn test_watcher_starts_and_stops() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let (service, _notes) = service(&temp_dir)?;
    let handle = service.watch()?;
    handle.stop();
    Ok(())
}
