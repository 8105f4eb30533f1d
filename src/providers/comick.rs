//! Aggregator-backed provider: Comick.
//!
//! Ids here are slugs/hids rather than UUIDs, which is exactly why the
//! routing fallback lands on this provider. Comick exposes no
//! reduced-bandwidth image set, so both handle variants share one list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::models::{
    AtHomeHandle, CanonicalManga, ChapterInfo, ContentRating, Demographic, MangaStatus, Source,
    Tag, TagGroup,
};
use crate::providers::{CatalogPage, Provider};
use crate::transport::RetryTransport;

pub const BASE_URL: &str = "https://api.comick.fun";
const IMAGE_CDN: &str = "https://meo.comick.pictures";

#[derive(Deserialize)]
struct ComicEnvelope {
    comic: Comic,
}

#[derive(Deserialize)]
struct Comic {
    hid: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    last_chapter: Option<f64>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    content_rating: Option<String>,
    #[serde(default)]
    demographic: Option<i64>,
    #[serde(default)]
    user_follow_count: Option<i64>,
    #[serde(default)]
    uploaded_at: Option<String>,
    #[serde(default)]
    md_titles: Vec<MdTitle>,
    #[serde(default)]
    md_comic_md_genres: Vec<MdGenreLink>,
    #[serde(default)]
    md_covers: Vec<MdCover>,
}

#[derive(Deserialize)]
struct MdTitle {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct MdGenreLink {
    md_genres: MdGenre,
}

#[derive(Deserialize)]
struct MdGenre {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Deserialize)]
struct MdCover {
    #[serde(default)]
    b2key: Option<String>,
}

#[derive(Deserialize)]
struct ChapterListEnvelope {
    #[serde(default)]
    chapters: Vec<ComickChapter>,
}

#[derive(Deserialize)]
struct ComickChapter {
    hid: String,
    #[serde(default)]
    chap: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Deserialize)]
struct ChapterEnvelope {
    chapter: ChapterImages,
}

#[derive(Deserialize)]
struct ChapterImages {
    #[serde(default)]
    md_images: Vec<MdImage>,
}

#[derive(Deserialize)]
struct MdImage {
    #[serde(default)]
    b2key: Option<String>,
}

/// Comick encodes status and demographic as small integers.
fn status_from_code(code: Option<i64>) -> MangaStatus {
    match code {
        Some(1) => MangaStatus::Ongoing,
        Some(2) => MangaStatus::Completed,
        Some(3) => MangaStatus::Cancelled,
        Some(4) => MangaStatus::Hiatus,
        _ => MangaStatus::Unknown,
    }
}

fn demographic_from_code(code: Option<i64>) -> Option<Demographic> {
    match code {
        Some(1) => Some(Demographic::Shounen),
        Some(2) => Some(Demographic::Shoujo),
        Some(3) => Some(Demographic::Seinen),
        Some(4) => Some(Demographic::Josei),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct ComickProvider {
    transport: RetryTransport,
    base_url: String,
    cdn_url: String,
}

impl ComickProvider {
    pub fn new(transport: RetryTransport) -> Self {
        Self::with_base_url(transport, BASE_URL, IMAGE_CDN)
    }

    pub fn with_base_url(transport: RetryTransport, base_url: &str, cdn_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            cdn_url: cdn_url.trim_end_matches('/').to_string(),
        }
    }

    fn normalize(&self, comic: Comic) -> CanonicalManga {
        let Comic {
            hid,
            slug,
            title,
            desc,
            status,
            country,
            last_chapter,
            year,
            content_rating,
            demographic,
            user_follow_count,
            uploaded_at,
            md_titles,
            md_comic_md_genres,
            md_covers,
        } = comic;

        let mut alt_titles: Vec<String> = Vec::new();
        for t in md_titles.into_iter().flat_map(|t| t.title) {
            if !t.is_empty() && t != title && !alt_titles.contains(&t) {
                alt_titles.push(t);
            }
        }

        let tags = md_comic_md_genres
            .into_iter()
            .map(|link| {
                let genre = link.md_genres;
                let name = genre.name.unwrap_or_default();
                Tag {
                    id: genre.slug.unwrap_or_else(|| name.to_lowercase()),
                    name,
                    group: genre
                        .group
                        .as_deref()
                        .map(TagGroup::from_upstream)
                        .unwrap_or(TagGroup::Theme),
                }
            })
            .collect();

        let cover_url = md_covers
            .into_iter()
            .flat_map(|c| c.b2key)
            .next()
            .map(|key| format!("{}/{}", self.cdn_url, key));

        // Prefer the slug as the public id so composite ids stay readable;
        // the hid remains reachable through chapter routes.
        let source_id = slug.unwrap_or(hid);

        CanonicalManga {
            source: Source::Comick,
            source_id,
            title,
            alt_titles,
            description: desc,
            status: status_from_code(status),
            content_rating: content_rating
                .as_deref()
                .map(ContentRating::from_upstream)
                .unwrap_or(ContentRating::Safe),
            demographic: demographic_from_code(demographic),
            original_language: country,
            last_chapter: last_chapter.map(|c| c.to_string()),
            last_volume: None,
            total_chapters: last_chapter.map(|c| c as i64),
            year,
            cover_url,
            followers: user_follow_count,
            source_updated_at: uploaded_at.as_deref().and_then(parse_timestamp),
            tags,
        }
    }
}

#[async_trait]
impl Provider for ComickProvider {
    fn source(&self) -> Source {
        Source::Comick
    }

    async fn catalog_page(
        &self,
        offset: u64,
        limit: u64,
        by_updated_desc: bool,
    ) -> ApiResult<CatalogPage> {
        // Comick paginates by page number, not offset.
        let limit = limit.max(1);
        let page = offset / limit + 1;
        let sort = if by_updated_desc { "uploaded" } else { "follow" };
        let url = format!(
            "{}/v1.0/search?page={}&limit={}&sort={}&tachiyomi=true",
            self.base_url, page, limit, sort
        );
        let comics: Vec<Comic> = self.transport.get_json(&url).await?;
        Ok(CatalogPage {
            items: comics.into_iter().map(|c| self.normalize(c)).collect(),
            total: None,
        })
    }

    async fn get_details(&self, id: &str) -> ApiResult<CanonicalManga> {
        let url = format!("{}/comic/{}?tachiyomi=true", self.base_url, id);
        let envelope: ComicEnvelope = self.transport.get_json(&url).await?;
        Ok(self.normalize(envelope.comic))
    }

    async fn list_chapters(&self, id: &str) -> ApiResult<Vec<ChapterInfo>> {
        let url = format!("{}/comic/{}/chapters?limit=500", self.base_url, id);
        let envelope: ChapterListEnvelope = self.transport.get_json(&url).await?;
        Ok(envelope
            .chapters
            .into_iter()
            .map(|ch| ChapterInfo {
                id: ch.hid,
                number: ch.chap,
                title: ch.title,
                language: ch.lang,
                published_at: ch.created_at.as_deref().and_then(parse_timestamp),
            })
            .collect())
    }

    async fn get_page_handle(&self, chapter_id: &str) -> ApiResult<AtHomeHandle> {
        let url = format!("{}/chapter/{}?tachiyomi=true", self.base_url, chapter_id);
        let envelope: ChapterEnvelope = self.transport.get_json(&url).await?;
        let files: Vec<String> = envelope
            .chapter
            .md_images
            .into_iter()
            .flat_map(|img| img.b2key)
            .collect();
        Ok(AtHomeHandle {
            base_url: self.cdn_url.clone(),
            hash: String::new(),
            data_saver: files.clone(),
            data: files,
            issued_at: Utc::now().timestamp(),
        })
    }

    async fn search(&self, text: &str) -> ApiResult<Vec<CanonicalManga>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1.0/search", self.base_url),
            &[("q", text), ("limit", "25"), ("tachiyomi", "true")],
        )
        .map_err(|e| crate::error::ApiError::Validation(e.to_string()))?;
        let comics: Vec<Comic> = self.transport.get_json(url.as_str()).await?;
        Ok(comics.into_iter().map(|c| self.normalize(c)).collect())
    }
}
