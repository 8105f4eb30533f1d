//! Catalog synchronization engine.
//!
//! One run-lock per catalog: starting a sync while one is running is a
//! no-op that reports the existing progress. Progress is persisted after
//! every committed batch, so a failed full run resumes from its last
//! committed offset instead of offset zero; a failed incremental run keeps
//! its offset for inspection but restarts from the top, where the watermark
//! makes the re-fetch cheap. A fetch or upsert failure never advances
//! the offset; it marks the run FAILED and leaves the store at the last
//! committed batch, which is safe because upserts are idempotent.

use chrono::Utc;
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::SyncConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics::MetricsTracker;
use crate::models::{CanonicalManga, Source, SyncMode, SyncProgress, SyncStatus};
use crate::providers::ProviderRegistry;
use crate::store;

pub struct SyncEngine {
    db: Arc<Mutex<Connection>>,
    providers: ProviderRegistry,
    config: SyncConfig,
    metrics: Arc<MetricsTracker>,
    running: Arc<Mutex<HashSet<Source>>>,
}

/// Releases the catalog's run-lock on every exit path, including panics.
struct RunGuard {
    running: Arc<Mutex<HashSet<Source>>>,
    source: Source,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.source);
        }
    }
}

impl SyncEngine {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        providers: ProviderRegistry,
        config: SyncConfig,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self {
            db,
            providers,
            config,
            metrics,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn try_begin(&self, source: Source) -> Option<RunGuard> {
        let mut set = self.running.lock().ok()?;
        if !set.insert(source) {
            return None;
        }
        Some(RunGuard { running: Arc::clone(&self.running), source })
    }

    pub fn status(&self, source: Source) -> ApiResult<SyncProgress> {
        let conn = self.db.lock().map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
        Ok(store::get_progress(&conn, source)?)
    }

    pub async fn full_sync(&self, source: Source) -> ApiResult<SyncProgress> {
        self.run(source, SyncMode::Full).await
    }

    pub async fn incremental_sync(&self, source: Source) -> ApiResult<SyncProgress> {
        self.run(source, SyncMode::Incremental).await
    }

    /// Fire-and-forget variants for the HTTP surface.
    pub fn spawn_full_sync(self: &Arc<Self>, source: Source) {
        let engine = Arc::clone(self);
        actix_web::rt::spawn(async move {
            if let Err(e) = engine.full_sync(source).await {
                log::error!("full sync for {} aborted: {}", source.name(), e);
            }
        });
    }

    pub fn spawn_incremental_sync(self: &Arc<Self>, source: Source) {
        let engine = Arc::clone(self);
        actix_web::rt::spawn(async move {
            if let Err(e) = engine.incremental_sync(source).await {
                log::error!("incremental sync for {} aborted: {}", source.name(), e);
            }
        });
    }

    fn persist(&self, source: Source, progress: &SyncProgress) -> ApiResult<()> {
        let conn = self.db.lock().map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
        store::put_progress(&conn, source, progress)?;
        Ok(())
    }

    fn fail(
        &self,
        source: Source,
        progress: &mut SyncProgress,
        message: String,
    ) -> ApiResult<SyncProgress> {
        log::error!("sync for {} failed at offset {}: {}", source.name(), progress.current_offset, message);
        progress.status = SyncStatus::Failed;
        progress.last_error = Some(message);
        progress.completed_at = Some(Utc::now().timestamp());
        self.persist(source, progress)?;
        Ok(progress.clone())
    }

    async fn run(&self, source: Source, mode: SyncMode) -> ApiResult<SyncProgress> {
        let Some(_guard) = self.try_begin(source) else {
            log::info!("sync for {} already running, reporting existing progress", source.name());
            return self.status(source);
        };
        let provider = self.providers.get(source)?;

        let previous = self.status(source)?;
        // A full run resumes only an offset a full run left behind; an
        // incremental restart is cheap because the watermark is unchanged,
        // and its offsets index a different catalog ordering anyway.
        let resuming = previous.status == SyncStatus::Failed
            && previous.mode == Some(SyncMode::Full)
            && mode == SyncMode::Full;
        let mut progress = if resuming {
            SyncProgress {
                status: SyncStatus::Running,
                last_error: None,
                started_at: Some(Utc::now().timestamp()),
                completed_at: None,
                ..previous
            }
        } else {
            SyncProgress {
                status: SyncStatus::Running,
                mode: Some(mode),
                started_at: Some(Utc::now().timestamp()),
                ..SyncProgress::default()
            }
        };
        self.persist(source, &progress)?;

        let watermark = match mode {
            SyncMode::Incremental => {
                let conn = self.db.lock().map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
                store::get_watermark(&conn, source)?
            }
            SyncMode::Full => None,
        };
        let by_updated = mode == SyncMode::Incremental;
        let batch_size = self.config.batch_size.max(1);
        let mut newest_seen: Option<i64> = None;

        log::info!(
            "{} sync for {} starting at offset {}",
            if by_updated { "incremental" } else { "full" },
            source.name(),
            progress.current_offset
        );

        loop {
            let fetch_started = std::time::Instant::now();
            let page = match provider
                .catalog_page(progress.current_offset, batch_size, by_updated)
                .await
            {
                Ok(page) => {
                    self.metrics.record_success(source.name(), fetch_started.elapsed());
                    page
                }
                Err(e) => {
                    self.metrics.record_failure(source.name(), e.to_string());
                    return self.fail(source, &mut progress, format!("fetch failed: {}", e));
                }
            };
            if let Some(total) = page.total {
                progress.total_to_process = Some(total);
            }
            let fetched = page.items.len() as u64;

            // Incremental early stop: the first record at or behind the
            // watermark marks this page as the delta boundary. Records newer
            // than the watermark in the same page are still synced.
            let mut boundary_hit = false;
            let items: Vec<CanonicalManga> = match watermark {
                Some(wm) => {
                    let mut kept = Vec::new();
                    for item in page.items {
                        let newer = item
                            .source_updated_at
                            .map(|ts| ts.timestamp() > wm)
                            .unwrap_or(false);
                        if newer {
                            kept.push(item);
                        } else {
                            boundary_hit = true;
                        }
                    }
                    kept
                }
                None => page.items,
            };

            for item in &items {
                if let Some(ts) = item.source_updated_at {
                    let ts = ts.timestamp();
                    if newest_seen.map(|n| ts > n).unwrap_or(true) {
                        newest_seen = Some(ts);
                    }
                }
            }

            {
                let mut conn = match self.db.lock() {
                    Ok(conn) => conn,
                    Err(_) => return self.fail(source, &mut progress, "store lock poisoned".into()),
                };
                if let Err(e) = store::upsert_batch(&mut conn, &items) {
                    drop(conn);
                    return self.fail(source, &mut progress, format!("upsert failed: {}", e));
                }
            }

            progress.total_processed += items.len() as u64;
            progress.current_offset += fetched;
            self.persist(source, &progress)?;

            if fetched < batch_size || boundary_hit {
                break;
            }
            if self.config.rate_limit_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
            }
        }

        progress.status = SyncStatus::Completed;
        progress.completed_at = Some(Utc::now().timestamp());
        self.persist(source, &progress)?;

        let next_watermark = newest_seen.or(watermark).unwrap_or_else(|| Utc::now().timestamp());
        {
            let conn = self.db.lock().map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
            let current = store::get_watermark(&conn, source)?;
            if current.map(|c| next_watermark > c).unwrap_or(true) {
                store::set_watermark(&conn, source, next_watermark)?;
            }
        }

        log::info!(
            "sync for {} completed: {} records processed",
            source.name(),
            progress.total_processed
        );
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentRating, MangaStatus};
    use crate::providers::{CatalogPage, Provider};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedProvider {
        items: Vec<CanonicalManga>,
        // Fetch at this offset fails once, then succeeds.
        fail_once_at: Mutex<Option<u64>>,
        pages_served: AtomicU64,
    }

    impl ScriptedProvider {
        fn new(items: Vec<CanonicalManga>) -> Self {
            Self {
                items,
                fail_once_at: Mutex::new(None),
                pages_served: AtomicU64::new(0),
            }
        }

        fn failing_at(items: Vec<CanonicalManga>, offset: u64) -> Self {
            let p = Self::new(items);
            *p.fail_once_at.lock().unwrap() = Some(offset);
            p
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn source(&self) -> Source {
            Source::MangaDex
        }

        async fn catalog_page(
            &self,
            offset: u64,
            limit: u64,
            by_updated_desc: bool,
        ) -> ApiResult<CatalogPage> {
            {
                let mut fail = self.fail_once_at.lock().unwrap();
                if *fail == Some(offset) {
                    *fail = None;
                    return Err(ApiError::UpstreamUnavailable("connection reset".into()));
                }
            }
            self.pages_served.fetch_add(1, Ordering::SeqCst);
            let mut items = self.items.clone();
            if by_updated_desc {
                items.sort_by_key(|m| {
                    std::cmp::Reverse(m.source_updated_at.map(|t| t.timestamp()).unwrap_or(i64::MIN))
                });
            }
            let start = (offset as usize).min(items.len());
            let end = (start + limit as usize).min(items.len());
            Ok(CatalogPage {
                items: items[start..end].to_vec(),
                total: Some(self.items.len() as u64),
            })
        }

        async fn get_details(&self, id: &str) -> ApiResult<CanonicalManga> {
            self.items
                .iter()
                .find(|m| m.source_id == id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(id.to_string()))
        }

        async fn list_chapters(&self, _id: &str) -> ApiResult<Vec<crate::models::ChapterInfo>> {
            Ok(Vec::new())
        }

        async fn get_page_handle(&self, _chapter_id: &str) -> ApiResult<crate::models::AtHomeHandle> {
            Err(ApiError::NotFound("no pages".into()))
        }

        async fn search(&self, _text: &str) -> ApiResult<Vec<CanonicalManga>> {
            Ok(self.items.clone())
        }
    }

    fn manga(id: u64, updated: i64) -> CanonicalManga {
        CanonicalManga {
            source: Source::MangaDex,
            source_id: format!("m{:04}", id),
            title: format!("Manga {}", id),
            alt_titles: Vec::new(),
            description: None,
            status: MangaStatus::Ongoing,
            content_rating: ContentRating::Safe,
            demographic: None,
            original_language: Some("ja".into()),
            last_chapter: None,
            last_volume: None,
            total_chapters: None,
            year: None,
            cover_url: None,
            followers: None,
            source_updated_at: Some(Utc.timestamp_opt(updated, 0).unwrap()),
            tags: Vec::new(),
        }
    }

    fn engine_with(provider: Arc<ScriptedProvider>, batch: u64) -> SyncEngine {
        let conn = Connection::open_in_memory().unwrap();
        store::create_tables(&conn).unwrap();
        let registry = ProviderRegistry::new().register(provider);
        let config = SyncConfig {
            batch_size: batch,
            rate_limit_delay_ms: 0,
            schedule_interval_secs: 0,
            catalogs: vec![Source::MangaDex],
        };
        SyncEngine::new(
            Arc::new(Mutex::new(conn)),
            registry,
            config,
            Arc::new(MetricsTracker::new()),
        )
    }

    fn store_snapshot(engine: &SyncEngine) -> Vec<CanonicalManga> {
        let conn = engine.db.lock().unwrap();
        store::candidates(&conn, &store::CandidateFilter::default()).unwrap()
    }

    #[tokio::test]
    async fn full_sync_processes_entire_catalog() {
        let items: Vec<_> = (0..25).map(|i| manga(i, 1000 + i as i64)).collect();
        let provider = Arc::new(ScriptedProvider::new(items));
        let engine = engine_with(Arc::clone(&provider), 10);

        let progress = engine.full_sync(Source::MangaDex).await.unwrap();
        assert_eq!(progress.status, SyncStatus::Completed);
        assert_eq!(progress.total_processed, 25);
        assert_eq!(progress.total_to_process, Some(25));
        assert_eq!(store_snapshot(&engine).len(), 25);
        // 10 + 10 + 5: the short page ends the run.
        assert_eq!(provider.pages_served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_sync_twice_is_idempotent() {
        let items: Vec<_> = (0..12).map(|i| manga(i, 1000 + i as i64)).collect();
        let provider = Arc::new(ScriptedProvider::new(items));
        let engine = engine_with(provider, 5);

        engine.full_sync(Source::MangaDex).await.unwrap();
        let first = store_snapshot(&engine);
        let progress = engine.full_sync(Source::MangaDex).await.unwrap();
        let second = store_snapshot(&engine);

        assert_eq!(first, second);
        assert_eq!(progress.total_processed, 12);
    }

    #[tokio::test]
    async fn failure_preserves_offset_and_resume_completes() {
        let items: Vec<_> = (0..30).map(|i| manga(i, 1000 + i as i64)).collect();
        // Fails fetching the third page (offset 20), after two committed batches.
        let provider = Arc::new(ScriptedProvider::failing_at(items.clone(), 20));
        let engine = engine_with(provider, 10);

        let progress = engine.full_sync(Source::MangaDex).await.unwrap();
        assert_eq!(progress.status, SyncStatus::Failed);
        assert_eq!(progress.current_offset, 20);
        assert_eq!(progress.total_processed, 20);
        assert!(progress.last_error.as_deref().unwrap().contains("fetch failed"));
        assert_eq!(store_snapshot(&engine).len(), 20);

        // The retry resumes at the committed offset and ends in the same
        // state as an uninterrupted run.
        let resumed = engine.full_sync(Source::MangaDex).await.unwrap();
        assert_eq!(resumed.status, SyncStatus::Completed);
        assert_eq!(resumed.total_processed, 30);

        let uninterrupted = engine_with(Arc::new(ScriptedProvider::new(items)), 10);
        uninterrupted.full_sync(Source::MangaDex).await.unwrap();
        assert_eq!(store_snapshot(&engine), store_snapshot(&uninterrupted));
    }

    #[tokio::test]
    async fn failed_incremental_keeps_offset_and_full_restarts_clean() {
        let items: Vec<_> = (0..30).map(|i| manga(i, 1000 + i as i64)).collect();
        // Second incremental page fails after one committed batch.
        let provider = Arc::new(ScriptedProvider::failing_at(items, 10));
        let engine = engine_with(Arc::clone(&provider), 10);
        {
            let conn = engine.db.lock().unwrap();
            store::set_watermark(&conn, Source::MangaDex, 500).unwrap();
        }

        let progress = engine.incremental_sync(Source::MangaDex).await.unwrap();
        assert_eq!(progress.status, SyncStatus::Failed);
        assert_eq!(progress.mode, Some(SyncMode::Incremental));
        // The offset stays where the last batch committed.
        assert_eq!(progress.current_offset, 10);
        assert_eq!(progress.total_processed, 10);

        // A full run never adopts an incremental offset: it walks the whole
        // catalog from the top.
        let full = engine.full_sync(Source::MangaDex).await.unwrap();
        assert_eq!(full.status, SyncStatus::Completed);
        assert_eq!(full.total_processed, 30);
        assert_eq!(store_snapshot(&engine).len(), 30);
    }

    #[tokio::test]
    async fn start_while_running_is_a_noop() {
        let provider = Arc::new(ScriptedProvider::new(vec![manga(1, 1000)]));
        let engine = engine_with(Arc::clone(&provider), 10);

        let _guard = engine.try_begin(Source::MangaDex).unwrap();
        let progress = engine.full_sync(Source::MangaDex).await.unwrap();
        // No pages fetched, existing (idle) progress reported.
        assert_eq!(provider.pages_served.load(Ordering::SeqCst), 0);
        assert_eq!(progress.status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn run_lock_released_after_completion() {
        let provider = Arc::new(ScriptedProvider::new(vec![manga(1, 1000)]));
        let engine = engine_with(provider, 10);
        engine.full_sync(Source::MangaDex).await.unwrap();
        assert!(engine.try_begin(Source::MangaDex).is_some());
    }

    #[tokio::test]
    async fn incremental_stops_at_watermark_boundary() {
        let items: Vec<_> = (0..30).map(|i| manga(i, 1000 + i as i64)).collect();
        let provider = Arc::new(ScriptedProvider::new(items.clone()));
        let engine = engine_with(Arc::clone(&provider), 10);

        // Baseline full sync establishes the watermark at ts 1029.
        engine.full_sync(Source::MangaDex).await.unwrap();
        let served_after_full = provider.pages_served.load(Ordering::SeqCst);

        // Nothing changed upstream: one page fetched, zero records synced.
        let progress = engine.incremental_sync(Source::MangaDex).await.unwrap();
        assert_eq!(progress.status, SyncStatus::Completed);
        assert_eq!(progress.total_processed, 0);
        assert_eq!(provider.pages_served.load(Ordering::SeqCst), served_after_full + 1);
    }

    #[tokio::test]
    async fn incremental_syncs_only_the_delta() {
        let mut items: Vec<_> = (0..30).map(|i| manga(i, 1000 + i as i64)).collect();
        let provider = Arc::new(ScriptedProvider::new(items.clone()));
        let engine = engine_with(Arc::clone(&provider), 10);
        engine.full_sync(Source::MangaDex).await.unwrap();

        // Three records updated upstream past the watermark.
        for (i, ts) in [(3usize, 2001i64), (7, 2002), (11, 2003)] {
            items[i].source_updated_at = Some(Utc.timestamp_opt(ts, 0).unwrap());
            items[i].title = format!("Updated {}", i);
        }
        let provider2 = Arc::new(ScriptedProvider::new(items));
        let engine2 = SyncEngine::new(
            Arc::clone(&engine.db),
            ProviderRegistry::new().register(Arc::clone(&provider2) as Arc<dyn Provider>),
            engine.config.clone(),
            Arc::new(MetricsTracker::new()),
        );

        let progress = engine2.incremental_sync(Source::MangaDex).await.unwrap();
        assert_eq!(progress.status, SyncStatus::Completed);
        assert_eq!(progress.total_processed, 3);
        // The delta fits the first page; the boundary record stops the run.
        assert_eq!(provider2.pages_served.load(Ordering::SeqCst), 1);

        let conn = engine.db.lock().unwrap();
        let updated = store::get_manga(&conn, Source::MangaDex, "m0007").unwrap().unwrap();
        assert_eq!(updated.title, "Updated 7");
    }
}
