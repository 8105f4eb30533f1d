//! Provider adapters: one capability set over heterogeneous upstreams.
//!
//! Callers never branch on provider identity except through
//! `resolve_source`, which is pure and total: every string routes somewhere,
//! defaulting to the aggregator.

pub mod comick;
pub mod mangadex;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::error::{ApiError, ApiResult};
use crate::models::{AtHomeHandle, CanonicalManga, ChapterInfo, Source};

pub use comick::ComickProvider;
pub use mangadex::MangaDexProvider;

/// One page of an upstream catalog listing. `total` is the upstream's own
/// estimate when it reports one.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub items: Vec<CanonicalManga>,
    pub total: Option<u64>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn source(&self) -> Source;

    /// List a catalog page. With `by_updated_desc` the upstream orders by
    /// its update timestamp, newest first; incremental sync depends on it.
    async fn catalog_page(
        &self,
        offset: u64,
        limit: u64,
        by_updated_desc: bool,
    ) -> ApiResult<CatalogPage>;

    async fn get_details(&self, id: &str) -> ApiResult<CanonicalManga>;

    async fn list_chapters(&self, id: &str) -> ApiResult<Vec<ChapterInfo>>;

    /// Issue a short-lived image-server handle for a chapter.
    async fn get_page_handle(&self, chapter_id: &str) -> ApiResult<AtHomeHandle>;

    async fn search(&self, text: &str) -> ApiResult<Vec<CanonicalManga>>;
}

fn is_uuid_shape(s: &str) -> bool {
    // Compiled once; routing runs on every request.
    static UUID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = UUID_RE.get_or_init(|| {
        regex::Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .expect("uuid pattern")
    });
    re.is_match(s)
}

/// Resolve an inbound identifier to `(source, native id)`.
///
/// Order: explicit source parameter, `source:id` composite with a known
/// prefix, UUID shape (native provider), otherwise the aggregator. Never
/// fails; ambiguity lands on Comick.
pub fn resolve_source(raw: &str, explicit: Option<&str>) -> (Source, String) {
    if let Some(source) = explicit.and_then(Source::parse) {
        return (source, raw.to_string());
    }
    if let Some((prefix, rest)) = raw.split_once(':') {
        if let Some(source) = Source::parse(prefix) {
            return (source, rest.to_string());
        }
    }
    if is_uuid_shape(raw) {
        return (Source::MangaDex, raw.to_string());
    }
    (Source::Comick, raw.to_string())
}

/// Source-keyed set of live adapters, shared across handlers and the sync
/// engine.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Source, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new() }
    }

    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.source(), provider);
        self
    }

    pub fn get(&self, source: Source) -> ApiResult<Arc<dyn Provider>> {
        self.providers
            .get(&source)
            .cloned()
            .ok_or_else(|| ApiError::Validation(format!("no provider for {}", source.name())))
    }

    /// Route a raw identifier to its provider and native id.
    pub fn route(&self, raw: &str, explicit: Option<&str>) -> ApiResult<(Arc<dyn Provider>, String)> {
        let (source, native_id) = resolve_source(raw, explicit);
        Ok((self.get(source)?, native_id))
    }

    pub fn sources(&self) -> Vec<Source> {
        self.providers.keys().copied().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_source_wins() {
        let (s, id) = resolve_source("some-slug", Some("mangadex"));
        assert_eq!(s, Source::MangaDex);
        assert_eq!(id, "some-slug");
    }

    #[test]
    fn unknown_explicit_falls_through() {
        let (s, id) = resolve_source("some-slug", Some("nope"));
        assert_eq!(s, Source::Comick);
        assert_eq!(id, "some-slug");
    }

    #[test]
    fn composite_prefix_routes() {
        let (s, id) = resolve_source("comick:solo-leveling", None);
        assert_eq!(s, Source::Comick);
        assert_eq!(id, "solo-leveling");

        let (s, id) = resolve_source("mangadex:abc", None);
        assert_eq!(s, Source::MangaDex);
        assert_eq!(id, "abc");
    }

    #[test]
    fn composite_preserves_separators_in_id() {
        // Only the first separator splits; the rest stays in the native id.
        let (s, id) = resolve_source("comick:a:b:c", None);
        assert_eq!(s, Source::Comick);
        assert_eq!(id, "a:b:c");
    }

    #[test]
    fn unknown_prefix_is_an_aggregator_id() {
        let (s, id) = resolve_source("weird:thing", None);
        assert_eq!(s, Source::Comick);
        assert_eq!(id, "weird:thing");
    }

    #[test]
    fn uuid_shape_routes_native() {
        let (s, id) = resolve_source("a1b2c3d4-e5f6-7890-abcd-ef1234567890", None);
        assert_eq!(s, Source::MangaDex);
        assert_eq!(id, "a1b2c3d4-e5f6-7890-abcd-ef1234567890");
    }

    #[test]
    fn everything_else_routes_aggregator() {
        for raw in ["solo-leveling", "", "12345", "not a uuid at all"] {
            let (s, id) = resolve_source(raw, None);
            assert_eq!(s, Source::Comick);
            assert_eq!(id, raw);
        }
    }

    #[test]
    fn roundtrip_composite_resolution() {
        for (source, native) in [
            (Source::MangaDex, "a1b2c3d4-e5f6-7890-abcd-ef1234567890"),
            (Source::Comick, "solo-leveling"),
            (Source::Comick, "id:with:colons"),
        ] {
            let composite = source.composite_id(native);
            let (s, id) = resolve_source(&composite, None);
            assert_eq!((s, id.as_str()), (source, native));
        }
    }
}
