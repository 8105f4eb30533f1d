//! Tag-weighted catalog search over the local store.
//!
//! Scalar filters run in SQL; tag filtering, free-text matching, and
//! scoring run here so the weights stay explicit. Candidate order from the
//! store is insertion order, and every sort below is stable, so equal keys
//! always tie-break the same way.

use rusqlite::Connection;

use crate::error::ApiResult;
use crate::models::{CanonicalManga, ScoredManga, SearchResponse, SortDirection, SortKey, TagQuery};
use crate::store::{self, CandidateFilter};

const TITLE_WEIGHT: f64 = 2.0;
const ALT_TITLE_WEIGHT: f64 = 1.5;
const DESCRIPTION_WEIGHT: f64 = 1.0;
const NO_TEXT_BASE: f64 = 1.0;
const PREFERRED_TAG_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub tags: TagQuery,
    pub filter: CandidateFilter,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub limit: usize,
    pub offset: usize,
}

fn has_tag(manga: &CanonicalManga, wanted: &str) -> bool {
    let wanted = wanted.to_lowercase();
    manga
        .tags
        .iter()
        .any(|t| t.id.to_lowercase() == wanted || t.name.to_lowercase() == wanted)
}

fn passes_tag_query(manga: &CanonicalManga, tags: &TagQuery) -> bool {
    tags.required.iter().all(|t| has_tag(manga, t))
        && !tags.excluded.iter().any(|t| has_tag(manga, t))
}

/// Best text match across the record's text fields, or `None` when the
/// query text matches nothing.
fn text_score(manga: &CanonicalManga, needle: &str) -> Option<f64> {
    if manga.title.to_lowercase().contains(needle) {
        return Some(TITLE_WEIGHT);
    }
    if manga.alt_titles.iter().any(|t| t.to_lowercase().contains(needle)) {
        return Some(ALT_TITLE_WEIGHT);
    }
    if manga
        .description
        .as_deref()
        .map(|d| d.to_lowercase().contains(needle))
        .unwrap_or(false)
    {
        return Some(DESCRIPTION_WEIGHT);
    }
    None
}

fn score(manga: &CanonicalManga, query: &SearchQuery, needle: Option<&str>) -> Option<f64> {
    let base = match needle {
        Some(needle) => text_score(manga, needle)?,
        None => NO_TEXT_BASE,
    };
    let bonus = query
        .tags
        .preferred
        .iter()
        .filter(|t| has_tag(manga, t))
        .count() as f64
        * PREFERRED_TAG_WEIGHT;
    Some(base + bonus)
}

fn sort_results(results: &mut [ScoredManga], sort: SortKey, direction: SortDirection) {
    // One stable sort over insertion order; the direction flips the key
    // comparison, never the slice, so equal keys keep insertion order.
    results.sort_by(|a, b| {
        let ord = match sort {
            SortKey::Relevance => a.score.total_cmp(&b.score),
            SortKey::Popularity => a
                .manga
                .followers
                .unwrap_or(i64::MIN)
                .cmp(&b.manga.followers.unwrap_or(i64::MIN)),
            SortKey::Latest => {
                let key = |m: &CanonicalManga| {
                    m.source_updated_at.map(|t| t.timestamp()).unwrap_or(i64::MIN)
                };
                key(&a.manga).cmp(&key(&b.manga))
            }
            SortKey::Title => a.manga.title.to_lowercase().cmp(&b.manga.title.to_lowercase()),
            SortKey::Year => a.manga.year.unwrap_or(i32::MIN).cmp(&b.manga.year.unwrap_or(i32::MIN)),
        };
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

pub fn execute(conn: &Connection, query: &SearchQuery) -> ApiResult<SearchResponse> {
    let candidates = store::candidates(conn, &query.filter)?;
    let needle = query.text.as_deref().map(str::to_lowercase);
    let needle = needle.as_deref().filter(|n| !n.is_empty());

    let mut results: Vec<ScoredManga> = candidates
        .into_iter()
        .filter(|m| passes_tag_query(m, &query.tags))
        .filter_map(|m| score(&m, query, needle).map(|score| ScoredManga { manga: m, score }))
        .collect();

    sort_results(&mut results, query.sort, query.direction);

    let total = results.len();
    let total_pages = if query.limit > 0 {
        total.div_ceil(query.limit)
    } else {
        0
    };
    let page: Vec<ScoredManga> = if query.limit == 0 || query.offset >= total {
        Vec::new()
    } else {
        results
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect()
    };

    Ok(SearchResponse {
        results: page,
        total,
        limit: query.limit,
        offset: query.offset,
        total_pages,
    })
}
