use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream catalog providers. MangaDex is the native API provider, Comick
/// the aggregator fallback for identifiers we cannot place anywhere else.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    MangaDex,
    Comick,
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::MangaDex => "mangadex",
            Source::Comick => "comick",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s.to_lowercase().as_str() {
            "mangadex" | "md" => Some(Source::MangaDex),
            "comick" | "ck" => Some(Source::Comick),
            _ => None,
        }
    }

    /// Encode `(source, native id)` into the composite form used in URLs.
    /// `resolve_source` reverses this for every native id.
    pub fn composite_id(&self, native_id: &str) -> String {
        format!("{}:{}", self.name(), native_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MangaStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
    Unknown,
}

impl MangaStatus {
    /// Total mapping: anything unrecognized becomes `Unknown`.
    pub fn from_upstream(s: &str) -> MangaStatus {
        match s.to_lowercase().as_str() {
            "ongoing" | "releasing" | "publishing" => MangaStatus::Ongoing,
            "completed" | "finished" | "complete" => MangaStatus::Completed,
            "hiatus" | "on_hiatus" => MangaStatus::Hiatus,
            "cancelled" | "canceled" | "discontinued" => MangaStatus::Cancelled,
            _ => MangaStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MangaStatus::Ongoing => "ongoing",
            MangaStatus::Completed => "completed",
            MangaStatus::Hiatus => "hiatus",
            MangaStatus::Cancelled => "cancelled",
            MangaStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentRating {
    Safe,
    Suggestive,
    Erotica,
    Pornographic,
}

impl ContentRating {
    /// Total mapping: anything unrecognized becomes `Safe`.
    pub fn from_upstream(s: &str) -> ContentRating {
        match s.to_lowercase().as_str() {
            "suggestive" | "ecchi" => ContentRating::Suggestive,
            "erotica" => ContentRating::Erotica,
            "pornographic" | "hentai" => ContentRating::Pornographic,
            _ => ContentRating::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentRating::Safe => "safe",
            ContentRating::Suggestive => "suggestive",
            ContentRating::Erotica => "erotica",
            ContentRating::Pornographic => "pornographic",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Demographic {
    Shounen,
    Shoujo,
    Seinen,
    Josei,
}

impl Demographic {
    /// Total mapping: anything unrecognized becomes `None`.
    pub fn from_upstream(s: &str) -> Option<Demographic> {
        match s.to_lowercase().as_str() {
            "shounen" | "shonen" => Some(Demographic::Shounen),
            "shoujo" | "shojo" => Some(Demographic::Shoujo),
            "seinen" => Some(Demographic::Seinen),
            "josei" => Some(Demographic::Josei),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Demographic::Shounen => "shounen",
            Demographic::Shoujo => "shoujo",
            Demographic::Seinen => "seinen",
            Demographic::Josei => "josei",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TagGroup {
    Genre,
    Theme,
    Format,
    Content,
}

impl TagGroup {
    /// Total mapping: anything unrecognized becomes `Theme`.
    pub fn from_upstream(s: &str) -> TagGroup {
        match s.to_lowercase().as_str() {
            "genre" => TagGroup::Genre,
            "format" => TagGroup::Format,
            "content" => TagGroup::Content,
            _ => TagGroup::Theme,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagGroup::Genre => "genre",
            TagGroup::Theme => "theme",
            TagGroup::Format => "format",
            TagGroup::Content => "content",
        }
    }
}

/// Provider-scoped tag. `id` is the upstream tag id (or a slug for
/// providers that only expose names).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub group: TagGroup,
}

/// Canonical manga record, the unit of the local store. Identity is
/// `(source, source_id)`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CanonicalManga {
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub alt_titles: Vec<String>,
    pub description: Option<String>,
    pub status: MangaStatus,
    pub content_rating: ContentRating,
    pub demographic: Option<Demographic>,
    pub original_language: Option<String>,
    pub last_chapter: Option<String>,
    pub last_volume: Option<String>,
    pub total_chapters: Option<i64>,
    pub year: Option<i32>,
    pub cover_url: Option<String>,
    pub followers: Option<i64>,
    /// Upstream update timestamp; drives incremental sync change detection.
    pub source_updated_at: Option<DateTime<Utc>>,
    pub tags: Vec<Tag>,
}

impl CanonicalManga {
    pub fn composite_id(&self) -> String {
        self.source.composite_id(&self.source_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChapterInfo {
    pub id: String,
    pub number: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> SyncStatus {
        match s {
            "running" => SyncStatus::Running,
            "completed" => SyncStatus::Completed,
            "failed" => SyncStatus::Failed,
            _ => SyncStatus::Idle,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }

    pub fn parse(s: &str) -> Option<SyncMode> {
        match s {
            "full" => Some(SyncMode::Full),
            "incremental" => Some(SyncMode::Incremental),
            _ => None,
        }
    }
}

/// Per-catalog sync bookkeeping. Owned by the sync engine, persisted so an
/// interrupted run resumes from `current_offset` instead of offset zero.
/// `mode` records which kind of run produced the row; a full sync only
/// resumes an offset left behind by another full sync, because full and
/// incremental runs walk the catalog in different orders.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncProgress {
    pub status: SyncStatus,
    pub mode: Option<SyncMode>,
    pub total_processed: u64,
    pub total_to_process: Option<u64>,
    pub current_offset: u64,
    pub last_error: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Default for SyncProgress {
    fn default() -> Self {
        SyncProgress {
            status: SyncStatus::Idle,
            mode: None,
            total_processed: 0,
            total_to_process: None,
            current_offset: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PageVariant {
    Normal,
    DataSaver,
}

impl PageVariant {
    pub fn parse(s: &str) -> PageVariant {
        match s.to_lowercase().as_str() {
            "data-saver" | "datasaver" | "saver" => PageVariant::DataSaver,
            _ => PageVariant::Normal,
        }
    }
}

/// Short-lived image-server handle issued by the upstream. Never persisted;
/// the reader cache evicts it after the handle TTL.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AtHomeHandle {
    pub base_url: String,
    pub hash: String,
    pub data: Vec<String>,
    pub data_saver: Vec<String>,
    /// Unix seconds at issuance.
    pub issued_at: i64,
}

impl AtHomeHandle {
    pub fn files(&self, variant: PageVariant) -> &[String] {
        match variant {
            PageVariant::Normal => &self.data,
            PageVariant::DataSaver => &self.data_saver,
        }
    }

    pub fn page_url(&self, variant: PageVariant, index: usize) -> Option<String> {
        let files = self.files(variant);
        let file = files.get(index)?;
        let segment = match variant {
            PageVariant::Normal => "data",
            PageVariant::DataSaver => "data-saver",
        };
        if self.hash.is_empty() {
            Some(format!("{}/{}", self.base_url.trim_end_matches('/'), file))
        } else {
            Some(format!(
                "{}/{}/{}/{}",
                self.base_url.trim_end_matches('/'),
                segment,
                self.hash,
                file
            ))
        }
    }
}

/// Weighted tag query: `required` is AND, `excluded` is a hard filter,
/// `preferred` only adds score.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TagQuery {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub preferred: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl TagQuery {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.preferred.is_empty() && self.excluded.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Relevance,
    Popularity,
    Latest,
    Title,
    Year,
}

impl SortKey {
    pub fn parse(s: &str) -> SortKey {
        match s.to_lowercase().as_str() {
            "popularity" | "followers" => SortKey::Popularity,
            "latest" | "updated" => SortKey::Latest,
            "title" => SortKey::Title,
            "year" => SortKey::Year,
            _ => SortKey::Relevance,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> SortDirection {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => SortDirection::Asc,
            _ => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ScoredManga {
    pub manga: CanonicalManga,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ScoredManga>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub total_pages: usize,
}
