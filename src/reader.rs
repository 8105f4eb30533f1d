//! Reader proxy: streams chapter page images through the retry transport,
//! reusing short-lived image-server handles while they are fresh.
//!
//! Handles expire passively on read after the configured TTL; an expired or
//! missing entry triggers one upstream handle fetch. Failed lookups are
//! never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{ApiError, ApiResult};
use crate::metrics::{track_request, MetricsTracker};
use crate::models::{AtHomeHandle, PageVariant};
use crate::providers::ProviderRegistry;
use crate::transport::RetryTransport;

/// Injectable time source so handle expiry is testable.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

pub struct HandleCache {
    entries: Mutex<HashMap<String, (AtHomeHandle, i64)>>,
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
}

impl HandleCache {
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_secs: ttl_secs as i64,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<AtHomeHandle> {
        let mut entries = self.entries.lock().ok()?;
        let (_, fetched_at) = entries.get(key)?;
        if self.clock.now_unix() - fetched_at >= self.ttl_secs {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|(handle, _)| handle.clone())
    }

    pub fn put(&self, key: &str, handle: AtHomeHandle) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (handle, self.clock.now_unix()));
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

pub struct ReaderProxy {
    registry: ProviderRegistry,
    transport: RetryTransport,
    cache: HandleCache,
    metrics: Arc<MetricsTracker>,
}

impl ReaderProxy {
    pub fn new(
        registry: ProviderRegistry,
        transport: RetryTransport,
        handle_ttl_secs: u64,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self::with_clock(registry, transport, handle_ttl_secs, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: ProviderRegistry,
        transport: RetryTransport,
        handle_ttl_secs: u64,
        metrics: Arc<MetricsTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            transport,
            cache: HandleCache::new(handle_ttl_secs, clock),
            metrics,
        }
    }

    async fn handle_for(&self, chapter_id: &str) -> ApiResult<(String, AtHomeHandle)> {
        let (provider, native_id) = self.registry.route(chapter_id, None)?;
        let key = provider.source().composite_id(&native_id);
        if let Some(handle) = self.cache.get(&key) {
            return Ok((key, handle));
        }
        let handle = track_request(
            &self.metrics,
            provider.source().name(),
            provider.get_page_handle(&native_id),
        )
        .await?;
        self.cache.put(&key, handle.clone());
        Ok((key, handle))
    }

    /// Fetch one page image for a chapter, returning the raw bytes and the
    /// upstream content type.
    pub async fn resolve_page(
        &self,
        chapter_id: &str,
        page: usize,
        variant: PageVariant,
    ) -> ApiResult<(Vec<u8>, String)> {
        let (key, handle) = self.handle_for(chapter_id).await?;
        let url = handle.page_url(variant, page).ok_or_else(|| {
            ApiError::NotFound(format!("page {} out of range for chapter {}", page, chapter_id))
        })?;

        match self.transport.get_bytes(&url).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                // The handle may have gone stale server-side; drop it so the
                // next request fetches a fresh one.
                self.cache.invalidate(&key);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::models::{CanonicalManga, ChapterInfo, Source};
    use crate::providers::{CatalogPage, Provider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeClock {
        now: Mutex<i64>,
    }

    impl FakeClock {
        fn at(now: i64) -> Arc<Self> {
            Arc::new(Self { now: Mutex::new(now) })
        }

        fn advance(&self, secs: i64) {
            *self.now.lock().unwrap() += secs;
        }
    }

    impl Clock for FakeClock {
        fn now_unix(&self) -> i64 {
            *self.now.lock().unwrap()
        }
    }

    struct HandleProvider {
        fetches: AtomicU64,
    }

    #[async_trait]
    impl Provider for HandleProvider {
        fn source(&self) -> Source {
            Source::Comick
        }

        async fn catalog_page(&self, _: u64, _: u64, _: bool) -> ApiResult<CatalogPage> {
            Ok(CatalogPage { items: Vec::new(), total: None })
        }

        async fn get_details(&self, id: &str) -> ApiResult<CanonicalManga> {
            Err(ApiError::NotFound(id.to_string()))
        }

        async fn list_chapters(&self, _: &str) -> ApiResult<Vec<ChapterInfo>> {
            Ok(Vec::new())
        }

        async fn get_page_handle(&self, _chapter_id: &str) -> ApiResult<AtHomeHandle> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(AtHomeHandle {
                base_url: "https://img.example".into(),
                hash: String::new(),
                data: vec!["p1.jpg".into(), "p2.jpg".into()],
                data_saver: vec!["p1-s.jpg".into(), "p2-s.jpg".into()],
                issued_at: 0,
            })
        }

        async fn search(&self, _: &str) -> ApiResult<Vec<CanonicalManga>> {
            Ok(Vec::new())
        }
    }

    fn proxy_with_clock(clock: Arc<FakeClock>) -> (ReaderProxy, Arc<HandleProvider>) {
        let provider = Arc::new(HandleProvider { fetches: AtomicU64::new(0) });
        let registry = ProviderRegistry::new().register(Arc::clone(&provider) as Arc<dyn Provider>);
        let transport = RetryTransport::new(RetryConfig::default()).unwrap();
        let proxy = ReaderProxy::with_clock(
            registry,
            transport,
            300,
            Arc::new(MetricsTracker::new()),
            clock,
        );
        (proxy, provider)
    }

    #[tokio::test]
    async fn out_of_range_page_is_not_found() {
        let (proxy, _) = proxy_with_clock(FakeClock::at(0));
        let err = proxy
            .resolve_page("some-chapter", 5, PageVariant::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn handle_is_reused_while_fresh() {
        let (proxy, provider) = proxy_with_clock(FakeClock::at(0));
        // Out-of-range pages fail after the handle lookup, so each call
        // exercises the cache without touching the image server.
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        let _ = proxy.resolve_page("ch1", 9, PageVariant::DataSaver).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_expires_after_ttl() {
        let clock = FakeClock::at(1000);
        let (proxy, provider) = proxy_with_clock(Arc::clone(&clock));
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        clock.advance(299);
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);

        clock.advance(1);
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configured_ttl_drives_handle_expiry() {
        let config = crate::config::Config::default();
        let provider = Arc::new(HandleProvider { fetches: AtomicU64::new(0) });
        let registry = ProviderRegistry::new().register(Arc::clone(&provider) as Arc<dyn Provider>);
        let transport = RetryTransport::new(RetryConfig::default()).unwrap();
        let clock = FakeClock::at(0);
        let proxy = ReaderProxy::with_clock(
            registry,
            transport,
            config.reader.handle_ttl_secs,
            Arc::new(MetricsTracker::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        clock.advance(config.reader.handle_ttl_secs as i64);
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_chapters_do_not_share_handles() {
        let (proxy, provider) = proxy_with_clock(FakeClock::at(0));
        let _ = proxy.resolve_page("ch1", 9, PageVariant::Normal).await;
        let _ = proxy.resolve_page("ch2", 9, PageVariant::Normal).await;
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }
}
