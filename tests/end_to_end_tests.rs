/// End-to-end integration tests
/// Exercises the whole local pipeline: configuration, store, sync engine,
/// and search, with no network involved.

use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use tankobon::config::Config;
use tankobon::error::{ApiError, ApiResult};
use tankobon::metrics::MetricsTracker;
use tankobon::models::{
    AtHomeHandle, CanonicalManga, ChapterInfo, ContentRating, MangaStatus, Source, Tag, TagGroup,
    TagQuery,
};
use tankobon::providers::{CatalogPage, Provider, ProviderRegistry};
use tankobon::search::{self, SearchQuery};
use tankobon::store;
use tankobon::sync::SyncEngine;

struct FixtureProvider {
    items: Vec<CanonicalManga>,
}

#[async_trait]
impl Provider for FixtureProvider {
    fn source(&self) -> Source {
        Source::MangaDex
    }

    async fn catalog_page(&self, offset: u64, limit: u64, _: bool) -> ApiResult<CatalogPage> {
        let start = (offset as usize).min(self.items.len());
        let end = (start + limit as usize).min(self.items.len());
        Ok(CatalogPage {
            items: self.items[start..end].to_vec(),
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

    async fn list_chapters(&self, _: &str) -> ApiResult<Vec<ChapterInfo>> {
        Ok(Vec::new())
    }

    async fn get_page_handle(&self, chapter_id: &str) -> ApiResult<AtHomeHandle> {
        Err(ApiError::NotFound(chapter_id.to_string()))
    }

    async fn search(&self, _: &str) -> ApiResult<Vec<CanonicalManga>> {
        Ok(self.items.clone())
    }
}

fn fixture(id: &str, title: &str, description: &str, tags: &[&str]) -> CanonicalManga {
    CanonicalManga {
        source: Source::MangaDex,
        source_id: id.to_string(),
        title: title.to_string(),
        alt_titles: Vec::new(),
        description: Some(description.to_string()),
        status: MangaStatus::Ongoing,
        content_rating: ContentRating::Safe,
        demographic: None,
        original_language: Some("ja".to_string()),
        last_chapter: None,
        last_volume: None,
        total_chapters: None,
        year: Some(2020),
        cover_url: None,
        followers: None,
        source_updated_at: None,
        tags: tags
            .iter()
            .map(|t| Tag {
                id: t.to_string(),
                name: t.to_string(),
                group: TagGroup::Genre,
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_sync_then_search_workflow() {
    // 1. Configuration defaults are usable as-is
    let config = Config::load();
    assert!(config.sync.batch_size > 0, "Config should have a batch size");

    // 2. Fresh in-memory store
    let conn = Connection::open_in_memory().unwrap();
    store::create_tables(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    // 3. Sync a fixture catalog
    let mut alt_match = fixture("b", "Another Story", "School comedy.", &["romance", "comedy"]);
    alt_match.alt_titles = vec!["The Mage of Beginnings".to_string()];
    let provider = Arc::new(FixtureProvider {
        items: vec![
            fixture("a", "Mage Academy", "Wizards at school.", &["action", "fantasy"]),
            alt_match,
            fixture("c", "Third Tale", "A retired mage farms.", &["slice-of-life"]),
            fixture("d", "Unrelated", "Sports drama.", &["sports"]),
        ],
    });
    let registry = ProviderRegistry::new().register(provider as Arc<dyn Provider>);
    let engine = SyncEngine::new(
        Arc::clone(&db),
        registry,
        config.sync.clone(),
        Arc::new(MetricsTracker::new()),
    );
    let progress = engine.full_sync(Source::MangaDex).await.unwrap();
    assert_eq!(progress.total_processed, 4);

    // 4. Text search ranks title over alt title over description
    let conn = db.lock().unwrap();
    let query = SearchQuery {
        text: Some("mage".to_string()),
        limit: 20,
        ..SearchQuery::default()
    };
    let response = search::execute(&conn, &query).unwrap();
    let titles: Vec<&str> = response.results.iter().map(|r| r.manga.title.as_str()).collect();
    assert_eq!(titles, vec!["Mage Academy", "Another Story", "Third Tale"]);

    // 5. A preferred tag lifts the alt-title match into a tie, which the
    // earlier-synced record wins
    let query = SearchQuery {
        text: Some("mage".to_string()),
        tags: TagQuery {
            preferred: vec!["romance".to_string()],
            ..TagQuery::default()
        },
        limit: 20,
        ..SearchQuery::default()
    };
    let response = search::execute(&conn, &query).unwrap();
    assert_eq!(response.results[0].manga.title, "Mage Academy");
    assert_eq!(response.results[0].score, response.results[1].score);

    // 6. Excluding a tag removes the match outright
    let query = SearchQuery {
        text: Some("mage".to_string()),
        tags: TagQuery {
            excluded: vec!["fantasy".to_string()],
            ..TagQuery::default()
        },
        limit: 20,
        ..SearchQuery::default()
    };
    let response = search::execute(&conn, &query).unwrap();
    let titles: Vec<&str> = response.results.iter().map(|r| r.manga.title.as_str()).collect();
    assert!(!titles.contains(&"Mage Academy"));
}

#[tokio::test]
async fn test_detail_lookup_round_trips_composite_ids() {
    let conn = Connection::open_in_memory().unwrap();
    store::create_tables(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let record = fixture("0a1b2c", "Solo Title", "One record.", &["drama"]);
    let provider = Arc::new(FixtureProvider { items: vec![record.clone()] });
    let registry = ProviderRegistry::new().register(provider as Arc<dyn Provider>);

    // The composite id routes back to the same provider and native id
    let composite = record.composite_id();
    let (routed, native_id) = registry.route(&composite, None).unwrap();
    assert_eq!(routed.source(), Source::MangaDex);
    assert_eq!(native_id, "0a1b2c");

    let fetched = routed.get_details(&native_id).await.unwrap();
    let mut conn = db.lock().unwrap();
    store::upsert_batch(&mut conn, std::slice::from_ref(&fetched)).unwrap();
    let stored = store::get_manga(&conn, Source::MangaDex, "0a1b2c").unwrap().unwrap();
    assert_eq!(stored, record);
}
