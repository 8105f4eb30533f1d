//! Native API provider: MangaDex.
//!
//! Normalizes the MangaDex JSON schema into the canonical model. All of the
//! normalization here is deterministic: multilingual maps are `BTreeMap`s so
//! "any available locale" always picks the same one for the same payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::config::LocaleConfig;
use crate::error::ApiResult;
use crate::models::{
    AtHomeHandle, CanonicalManga, ChapterInfo, ContentRating, Demographic, MangaStatus, Source,
    Tag, TagGroup,
};
use crate::providers::{CatalogPage, Provider};
use crate::transport::RetryTransport;

pub const BASE_URL: &str = "https://api.mangadex.org";
const COVER_BASE: &str = "https://uploads.mangadex.org/covers";

#[derive(Deserialize)]
struct MangaList {
    data: Vec<MangaData>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct MangaEnvelope {
    data: MangaData,
}

#[derive(Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: BTreeMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    description: BTreeMap<String, String>,
    #[serde(default)]
    original_language: Option<String>,
    #[serde(default)]
    last_volume: Option<String>,
    #[serde(default)]
    last_chapter: Option<String>,
    #[serde(default)]
    publication_demographic: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    content_rating: Option<String>,
    #[serde(default)]
    tags: Vec<TagData>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct TagData {
    id: String,
    attributes: TagAttributes,
}

#[derive(Deserialize)]
struct TagAttributes {
    #[serde(default)]
    name: BTreeMap<String, String>,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChapterList {
    data: Vec<ChapterData>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    translated_language: Option<String>,
    #[serde(default)]
    publish_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
    #[serde(default)]
    data_saver: Vec<String>,
}

pub struct MangaDexProvider {
    transport: RetryTransport,
    base_url: String,
    locale: LocaleConfig,
}

impl MangaDexProvider {
    pub fn new(transport: RetryTransport, locale: LocaleConfig) -> Self {
        Self::with_base_url(transport, locale, BASE_URL)
    }

    pub fn with_base_url(transport: RetryTransport, locale: LocaleConfig, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            locale,
        }
    }

    /// Locale preference: primary, fallback, then the first available.
    fn pick_locale<'a>(&self, map: &'a BTreeMap<String, String>) -> Option<&'a str> {
        map.get(&self.locale.primary)
            .or_else(|| map.get(&self.locale.fallback))
            .or_else(|| map.values().next())
            .map(|s| s.as_str())
    }

    fn normalize(&self, data: MangaData) -> CanonicalManga {
        let MangaData { id, attributes: attrs, relationships } = data;
        let title = self
            .pick_locale(&attrs.title)
            .unwrap_or_default()
            .to_string();

        // Flatten every locale variant of every title into one deduplicated
        // ordered list, minus the chosen display title.
        let mut alt_titles: Vec<String> = Vec::new();
        for t in attrs.title.values() {
            if !t.is_empty() && t != &title && !alt_titles.contains(t) {
                alt_titles.push(t.clone());
            }
        }
        for variant in &attrs.alt_titles {
            for t in variant.values() {
                if !t.is_empty() && t != &title && !alt_titles.contains(t) {
                    alt_titles.push(t.clone());
                }
            }
        }

        let description = self.pick_locale(&attrs.description).map(|s| s.to_string());

        let cover_url = relationships
            .iter()
            .find(|r| r.rel_type == "cover_art")
            .and_then(|rel| {
                rel.attributes
                    .as_ref()
                    .and_then(|a| a.get("fileName"))
                    .and_then(|f| f.as_str())
                    .map(|file| format!("{}/{}/{}", COVER_BASE, id, file))
            });

        let tags = attrs
            .tags
            .iter()
            .map(|t| Tag {
                id: t.id.clone(),
                name: self
                    .pick_locale(&t.attributes.name)
                    .unwrap_or_default()
                    .to_string(),
                group: t
                    .attributes
                    .group
                    .as_deref()
                    .map(TagGroup::from_upstream)
                    .unwrap_or(TagGroup::Theme),
            })
            .collect();

        let total_chapters = attrs
            .last_chapter
            .as_deref()
            .and_then(|c| c.parse::<f64>().ok())
            .map(|c| c as i64);

        CanonicalManga {
            source: Source::MangaDex,
            source_id: id,
            title,
            alt_titles,
            description,
            status: attrs
                .status
                .as_deref()
                .map(MangaStatus::from_upstream)
                .unwrap_or(MangaStatus::Unknown),
            content_rating: attrs
                .content_rating
                .as_deref()
                .map(ContentRating::from_upstream)
                .unwrap_or(ContentRating::Safe),
            demographic: attrs
                .publication_demographic
                .as_deref()
                .and_then(Demographic::from_upstream),
            original_language: attrs.original_language.clone(),
            last_chapter: attrs.last_chapter.clone(),
            last_volume: attrs.last_volume.clone(),
            total_chapters,
            year: attrs.year,
            cover_url,
            followers: None,
            source_updated_at: attrs.updated_at.as_deref().and_then(parse_timestamp),
            tags,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Provider for MangaDexProvider {
    fn source(&self) -> Source {
        Source::MangaDex
    }

    async fn catalog_page(
        &self,
        offset: u64,
        limit: u64,
        by_updated_desc: bool,
    ) -> ApiResult<CatalogPage> {
        let mut url = format!(
            "{}/manga?limit={}&offset={}&includes[]=cover_art",
            self.base_url, limit, offset
        );
        if by_updated_desc {
            url.push_str("&order[updatedAt]=desc");
        }
        let list: MangaList = self.transport.get_json(&url).await?;
        Ok(CatalogPage {
            items: list.data.into_iter().map(|d| self.normalize(d)).collect(),
            total: list.total,
        })
    }

    async fn get_details(&self, id: &str) -> ApiResult<CanonicalManga> {
        let url = format!("{}/manga/{}?includes[]=cover_art", self.base_url, id);
        let envelope: MangaEnvelope = self.transport.get_json(&url).await?;
        Ok(self.normalize(envelope.data))
    }

    async fn list_chapters(&self, id: &str) -> ApiResult<Vec<ChapterInfo>> {
        let mut out = Vec::new();
        let limit = 100u64;
        let mut offset = 0u64;
        loop {
            let url = format!(
                "{}/manga/{}/feed?limit={}&offset={}&order[chapter]=asc",
                self.base_url, id, limit, offset
            );
            let page: ChapterList = self.transport.get_json(&url).await?;
            let fetched = page.data.len() as u64;
            for ch in page.data {
                out.push(ChapterInfo {
                    id: ch.id,
                    number: ch.attributes.chapter,
                    title: ch.attributes.title,
                    language: ch.attributes.translated_language,
                    published_at: ch.attributes.publish_at.as_deref().and_then(parse_timestamp),
                });
            }
            offset += fetched;
            let done = fetched < limit
                || page.total.map(|t| offset >= t).unwrap_or(false)
                || fetched == 0;
            if done {
                break;
            }
        }
        Ok(out)
    }

    async fn get_page_handle(&self, chapter_id: &str) -> ApiResult<AtHomeHandle> {
        let url = format!("{}/at-home/server/{}", self.base_url, chapter_id);
        let resp: AtHomeResponse = self.transport.get_json(&url).await?;
        Ok(AtHomeHandle {
            base_url: resp.base_url,
            hash: resp.chapter.hash,
            data: resp.chapter.data,
            data_saver: resp.chapter.data_saver,
            issued_at: Utc::now().timestamp(),
        })
    }

    async fn search(&self, text: &str) -> ApiResult<Vec<CanonicalManga>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/manga", self.base_url),
            &[("title", text), ("limit", "25"), ("includes[]", "cover_art")],
        )
        .map_err(|e| crate::error::ApiError::Validation(e.to_string()))?;
        let list: MangaList = self.transport.get_json(url.as_str()).await?;
        Ok(list.data.into_iter().map(|d| self.normalize(d)).collect())
    }
}
