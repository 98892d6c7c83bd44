//! The Indexer's 8-step scan algorithm (§4.4).
//!
//! Directory walk mechanics grounded on the donor's `scanner/mod.rs`
//! (`WalkDir`, lowercase extension match), here driven synchronously from
//! the Indexer's dedicated thread instead of the donor's
//! `spawn_blocking`-backed `Stream`. Delete/cleanup/optimize steps are
//! grounded on musikcube's `Indexer.cpp::SyncDelete/SyncCleanup/SyncOptimize`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use crate::catalog::{cleanup, folders, optimize, paths, tracks, Catalog};
use crate::error::Result;
use crate::indexer::{IndexerSignal, IndexerStatus, PathOp, Shared};
use crate::plugin_host::PluginHost;
use crate::track_record::TrackRecord;

/// Runs one full scan pass. Returns the number of tracks saved. Any step
/// may return early once `shared.should_abort()` goes true; the outer loop
/// (`indexer::run_loop`) re-enters from the top on the next iteration.
pub(crate) async fn run_scan(
    shared: &Shared,
    catalog: &Catalog,
    library_path: &Path,
    plugin_host: &Arc<PluginHost>,
) -> Result<u64> {
    let pool = catalog.pool();

    // Step 2: drain add/remove queue, prune orphaned folders.
    shared.set_status(IndexerStatus::Idle);
    {
        let ops: Vec<PathOp> = std::mem::take(&mut *shared.pending_ops.lock().unwrap());
        if !ops.is_empty() {
            for op in ops {
                match op {
                    PathOp::Add(p) => {
                        paths::add_path(pool, &p.to_string_lossy()).await?;
                    }
                    PathOp::Remove(p) => {
                        paths::remove_path(pool, &p.to_string_lossy()).await?;
                    }
                }
            }
            paths::prune_orphaned_folders(pool).await?;
            let _ = shared.signals.send(IndexerSignal::PathsUpdated);
        }
    }
    if shared.should_abort() {
        return Ok(0);
    }

    let sync_paths = paths::list_paths(pool).await?;

    // Step 3: count files for progress denominators.
    shared.set_status(IndexerStatus::CountingFiles);
    let readers = plugin_host.metadata_readers();
    let mut total_files: u64 = 0;
    for sync_path in &sync_paths {
        let root = PathBuf::from(&sync_path.path);
        if !root.exists() {
            continue;
        }
        total_files += count_readable_files(&root, &readers);
        shared.set_files_counted(total_files);
        if shared.should_abort() {
            return Ok(0);
        }
    }

    // Step 4: walk and index.
    shared.set_status(IndexerStatus::IndexingFiles);
    let mut saved: u64 = 0;
    let mut seen_since_progress: u64 = 0;
    let mut saved_since_refresh: u64 = 0;

    for sync_path in &sync_paths {
        let root = PathBuf::from(&sync_path.path);
        if !root.exists() {
            continue;
        }

        let root_folder_id = folders::upsert_folder(pool, root_name(&root), None, sync_path.id, "").await?;
        let mut dir_folder_ids: HashMap<PathBuf, i64> = HashMap::new();
        dir_folder_ids.insert(root.clone(), root_folder_id);

        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if shared.should_abort() {
                return Ok(saved);
            }
            let path = entry.path();

            if entry.file_type().is_dir() {
                if path == root {
                    continue;
                }
                let Some(parent) = path.parent() else { continue };
                let Some(&parent_id) = dir_folder_ids.get(parent) else { continue };
                let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let relative = path.strip_prefix(&root).unwrap_or(path).to_string_lossy().to_string();
                match folders::upsert_folder(pool, &name, Some(parent_id), sync_path.id, &relative).await {
                    Ok(folder_id) => {
                        dir_folder_ids.insert(path.to_path_buf(), folder_id);
                    }
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to upsert folder, skipping"),
                }
                std::thread::yield_now();
                continue;
            }

            let Some(extension) = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase) else {
                continue;
            };
            if !readers.iter().any(|r| r.can_read_tag(&extension)) {
                continue;
            }
            let Some(parent) = path.parent() else { continue };
            let folder_id = dir_folder_ids.get(parent).copied().unwrap_or(root_folder_id);

            match index_one_file(pool, library_path, &readers, path, folder_id).await {
                Ok(true) => {
                    saved += 1;
                    saved_since_refresh += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to index file, skipping");
                }
            }

            seen_since_progress += 1;
            if seen_since_progress >= 25 {
                seen_since_progress = 0;
                let overall = if total_files > 0 { saved as f64 / total_files as f64 } else { 0.0 };
                shared.set_overall_progress(overall);
                let _ = shared.signals.send(IndexerSignal::Progress(saved));
            }
            if saved_since_refresh >= 100 {
                saved_since_refresh = 0;
                let _ = shared.signals.send(IndexerSignal::TrackRefreshed);
            }
        }
    }
    if shared.should_abort() {
        return Ok(saved);
    }

    // Step 5: delete sweep.
    shared.set_status(IndexerStatus::RemovingMissing);
    for sync_path in &sync_paths {
        if shared.should_abort() {
            return Ok(saved);
        }
        let root = PathBuf::from(&sync_path.path);
        if !root.exists() {
            // Root itself is unreachable (e.g. an unmounted drive); skip
            // entirely rather than mass-deleting everything under it.
            continue;
        }

        for folder in folders::folders_under_path(pool, sync_path.id).await? {
            let full_path = root.join(&folder.relative_path);
            if !full_path.exists() {
                folders::delete_folder(pool, folder.id).await?;
                continue;
            }
            for track in tracks::list_by_folder(pool, folder.id).await? {
                let track_path = root.join(&folder.relative_path).join(&track.filename);
                if !track_path.exists() {
                    tracks::delete_by_id(pool, track.id).await?;
                }
            }
        }
    }
    if shared.should_abort() {
        return Ok(saved);
    }

    // Step 6: cleanup.
    shared.set_status(IndexerStatus::Cleanup);
    cleanup::run(catalog).await?;
    if shared.should_abort() {
        return Ok(saved);
    }

    // Step 7: optimize.
    shared.set_status(IndexerStatus::Optimizing);
    optimize::run(catalog).await?;
    if shared.should_abort() {
        return Ok(saved);
    }

    // Step 8: analyze.
    let analyzers = plugin_host.analyzers();
    if !analyzers.is_empty() {
        shared.set_status(IndexerStatus::AnalyzingAudio);
        run_analyzers(shared, catalog, plugin_host, &analyzers).await?;
    }

    Ok(saved)
}

fn root_name(root: &Path) -> &str {
    root.file_name().and_then(|n| n.to_str()).unwrap_or("/")
}

fn count_readable_files(root: &Path, readers: &[Arc<dyn crate::plugin_host::capability::MetadataReader>]) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_lowercase)
                .is_some_and(|ext| readers.iter().any(|r| r.can_read_tag(&ext)))
        })
        .count() as u64
}

/// Builds a Track Record for `path`, checks the needs-indexing predicate,
/// and saves it if any reader succeeded and the record was dirty.
async fn index_one_file(
    pool: &sqlx::SqlitePool,
    library_path: &Path,
    readers: &[Arc<dyn crate::plugin_host::capability::MetadataReader>],
    path: &Path,
    folder_id: i64,
) -> Result<bool> {
    let metadata = std::fs::metadata(path)?;
    let filesize = metadata.len() as i64;
    let filetime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let external_id = path.to_string_lossy().to_string();
    let filename = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

    let mut record = TrackRecord::new(external_id);
    record.filesize = filesize;
    record.filetime = filetime;
    record.set("filename", filename.clone());

    if !record.check_needs_indexing(pool, folder_id, &filename).await? {
        return Ok(false);
    }

    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).unwrap_or_default();
    let mut any_read = false;
    for reader in readers {
        if !reader.can_read_tag(&extension) {
            continue;
        }
        match reader.read_tag(path, &mut record).await {
            Ok(true) => any_read = true,
            Ok(false) => {}
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "reader failed on file"),
        }
    }

    if !any_read {
        return Ok(false);
    }

    record.save(pool, library_path, folder_id, 0).await?;
    Ok(true)
}

/// Step 8: for every track in id order, run the started analyzer set over
/// its decoded audio, sourced the same way `transport::spawn_player` opens
/// a track (a `DataStreamFactory` pre-flight open plus a `DecoderFactory`),
/// but with no DSP chain or output in the loop — analyzers observe raw
/// decoded buffers directly. Yields between every buffer (§4.4 step 8) so a
/// long track doesn't starve the Indexer's abort check.
async fn run_analyzers(
    shared: &Shared,
    catalog: &Catalog,
    plugin_host: &Arc<PluginHost>,
    analyzers: &[(PathBuf, Arc<parking_lot::Mutex<dyn crate::plugin_host::capability::Analyzer>>)],
) -> Result<()> {
    let pool = catalog.pool();
    let mut after_id = 0i64;

    while let Some(track) = tracks::next_after(pool, after_id).await? {
        after_id = track.id;
        if shared.should_abort() {
            return Ok(());
        }

        let mut running: Vec<&(PathBuf, Arc<parking_lot::Mutex<dyn crate::plugin_host::capability::Analyzer>>)> =
            Vec::new();
        for entry @ (path, analyzer) in analyzers {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| analyzer.lock().start(&track))) {
                Ok(true) => running.push(entry),
                Ok(false) => {}
                Err(_) => {
                    tracing::warn!(path = %path.display(), "analyzer panicked in start(), evicting");
                    plugin_host.evict(path);
                }
            }
            std::thread::yield_now();
        }

        if !running.is_empty() {
            if let Err(e) = decode_for_analysis(&track, plugin_host, &running, shared) {
                tracing::debug!(track_id = track.id, error = %e, "analyzer decode failed, skipping buffers");
            }
        }

        let mut wrote_metadata = false;
        for (path, analyzer) in running {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| analyzer.lock().end(&track))) {
                Ok(true) => wrote_metadata = true,
                Ok(false) => {}
                Err(_) => {
                    tracing::warn!(path = %path.display(), "analyzer panicked in end(), evicting");
                    plugin_host.evict(path);
                }
            }
            std::thread::yield_now();
        }

        if wrote_metadata {
            let _ = shared.signals.send(IndexerSignal::TrackRefreshed);
        }
    }

    Ok(())
}

/// Opens `track.external_id` via whichever `DataStreamFactory`/
/// `DecoderFactory` pair can handle it and feeds every decoded buffer to
/// each still-running analyzer, dropping one out of `running` as soon as
/// it returns false from `analyze()` or panics.
fn decode_for_analysis(
    track: &crate::model::Track,
    plugin_host: &Arc<PluginHost>,
    running: &[&(PathBuf, Arc<parking_lot::Mutex<dyn crate::plugin_host::capability::Analyzer>>)],
    shared: &Shared,
) -> Result<()> {
    let uri = &track.external_id;
    let extension = Path::new(uri.as_str())
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let Some((stream_plugin_path, stream_factory)) = plugin_host.find_data_stream_factory(uri) else {
        return Ok(());
    };
    let Some((decoder_plugin_path, decoder_factory)) = plugin_host.find_decoder_factory(&extension) else {
        return Ok(());
    };

    // Pre-flight open, same as `transport::spawn_player`; the decoder
    // itself re-opens `uri` by URI.
    let stream_open_result = stream_factory.open(uri);
    if stream_open_result.is_err() {
        plugin_host.evict(&stream_plugin_path);
    }
    let _stream = stream_open_result?;

    let mut decoder = decoder_factory.create_decoder();
    if let Err(e) = decoder.open(uri) {
        plugin_host.evict(&decoder_plugin_path);
        return Err(e);
    }

    let mut still_running: Vec<&(PathBuf, Arc<parking_lot::Mutex<dyn crate::plugin_host::capability::Analyzer>>)> =
        running.to_vec();
    let mut buffer = Vec::with_capacity(4096);

    while !still_running.is_empty() && !decoder.eof() {
        if shared.should_abort() {
            decoder.interrupt();
            break;
        }

        buffer.clear();
        match decoder.fill_buffer(&mut buffer) {
            Ok(true) => {
                still_running.retain(|(path, analyzer)| {
                    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| analyzer.lock().analyze(track, &buffer))) {
                        Ok(keep_running) => keep_running,
                        Err(_) => {
                            tracing::warn!(path = %path.display(), "analyzer panicked in analyze(), evicting");
                            plugin_host.evict(path);
                            false
                        }
                    }
                });
            }
            Ok(false) => break,
            Err(e) => {
                plugin_host.evict(&decoder_plugin_path);
                tracing::debug!(track_id = track.id, error = %e, "decode error during analysis");
                break;
            }
        }

        std::thread::yield_now();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn root_name_falls_back_to_slash_for_root_path() {
        assert_eq!(root_name(Path::new("/")), "/");
        assert_eq!(root_name(Path::new("/music")), "music");
    }

    #[tokio::test]
    async fn index_one_file_skips_when_not_dirty() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("a.mp3");
        std::fs::write(&file_path, b"not really audio").unwrap();

        // No readers configured: any_read stays false, so index_one_file
        // returns Ok(false) without attempting a save.
        let saved = index_one_file(catalog.pool(), dir.path(), &[], &file_path, 1)
            .await
            .unwrap();
        assert!(!saved);
    }
}
