//! Canonical SQLite store.
//!
//! Manga rows are keyed by `(source, source_id)` and written only by the
//! sync engine's upsert path. Tag associations are replaced wholesale per
//! record on every upsert, so re-running a sync over an unchanged upstream
//! leaves the store byte-for-byte identical.

use chrono::DateTime;
use rusqlite::{params, Connection, Result, Row};

use crate::models::{
    CanonicalManga, ContentRating, Demographic, MangaStatus, Source, SyncMode, SyncProgress,
    SyncStatus, Tag, TagGroup,
};

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    create_tables(&conn)?;
    Ok(conn)
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS manga (
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            alt_titles TEXT NOT NULL DEFAULT '[]',
            description TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            content_rating TEXT NOT NULL DEFAULT 'safe',
            demographic TEXT,
            original_language TEXT,
            last_chapter TEXT,
            last_volume TEXT,
            total_chapters INTEGER,
            year INTEGER,
            cover_url TEXT,
            followers INTEGER,
            source_updated_at INTEGER,
            PRIMARY KEY (source, source_id)
        );
        CREATE TABLE IF NOT EXISTS tags (
            source TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            name TEXT NOT NULL,
            tag_group TEXT NOT NULL DEFAULT 'theme',
            PRIMARY KEY (source, tag_id)
        );
        CREATE TABLE IF NOT EXISTS manga_tags (
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            PRIMARY KEY (source, source_id, tag_id)
        );
        CREATE INDEX IF NOT EXISTS idx_manga_tags_manga ON manga_tags(source, source_id);
        CREATE TABLE IF NOT EXISTS sync_progress (
            source TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'idle',
            mode TEXT,
            total_processed INTEGER NOT NULL DEFAULT 0,
            total_to_process INTEGER,
            current_offset INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            started_at INTEGER,
            completed_at INTEGER,
            watermark INTEGER
        );",
    )?;
    Ok(())
}

/// Scalar filters for candidate reads; tag and free-text criteria are
/// applied by the search engine on top of this.
#[derive(Debug, Default, Clone)]
pub struct CandidateFilter {
    pub status: Option<MangaStatus>,
    pub content_rating: Option<ContentRating>,
    pub demographic: Option<Demographic>,
    pub original_language: Option<String>,
    pub min_chapters: Option<i64>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
}

fn row_to_manga(row: &Row<'_>) -> Result<CanonicalManga> {
    let source_raw: String = row.get(0)?;
    let source = Source::parse(&source_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown source '{}'", source_raw).into(),
        )
    })?;
    let alt_raw: String = row.get(3)?;
    let alt_titles: Vec<String> = serde_json::from_str(&alt_raw).unwrap_or_default();
    let status_raw: String = row.get(5)?;
    let rating_raw: String = row.get(6)?;
    let demographic: Option<String> = row.get(7)?;
    let updated: Option<i64> = row.get(15)?;

    Ok(CanonicalManga {
        source,
        source_id: row.get(1)?,
        title: row.get(2)?,
        alt_titles,
        description: row.get(4)?,
        status: MangaStatus::from_upstream(&status_raw),
        content_rating: ContentRating::from_upstream(&rating_raw),
        demographic: demographic.as_deref().and_then(Demographic::from_upstream),
        original_language: row.get(8)?,
        last_chapter: row.get(9)?,
        last_volume: row.get(10)?,
        total_chapters: row.get(11)?,
        year: row.get(12)?,
        cover_url: row.get(13)?,
        followers: row.get(14)?,
        source_updated_at: updated.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        tags: Vec::new(),
    })
}

const MANGA_COLUMNS: &str = "source, source_id, title, alt_titles, description, status, \
    content_rating, demographic, original_language, last_chapter, last_volume, \
    total_chapters, year, cover_url, followers, source_updated_at";

fn load_tags(conn: &Connection, source: Source, source_id: &str) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.tag_id, t.name, t.tag_group FROM manga_tags mt
         JOIN tags t ON t.source = mt.source AND t.tag_id = mt.tag_id
         WHERE mt.source = ?1 AND mt.source_id = ?2 ORDER BY t.tag_id",
    )?;
    let rows = stmt.query_map(params![source.name(), source_id], |row| {
        let group_raw: String = row.get(2)?;
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            group: TagGroup::from_upstream(&group_raw),
        })
    })?;
    rows.collect()
}

/// Transactional insert-or-update for one batch. Safe to repeat: keyed on
/// the natural key, tag associations replaced rather than appended.
pub fn upsert_batch(conn: &mut Connection, batch: &[CanonicalManga]) -> Result<()> {
    let tx = conn.transaction()?;
    for manga in batch {
        let alt_json =
            serde_json::to_string(&manga.alt_titles).unwrap_or_else(|_| "[]".to_string());
        tx.execute(
            "INSERT INTO manga (source, source_id, title, alt_titles, description, status,
                content_rating, demographic, original_language, last_chapter, last_volume,
                total_chapters, year, cover_url, followers, source_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(source, source_id) DO UPDATE SET
                title=excluded.title,
                alt_titles=excluded.alt_titles,
                description=excluded.description,
                status=excluded.status,
                content_rating=excluded.content_rating,
                demographic=excluded.demographic,
                original_language=excluded.original_language,
                last_chapter=excluded.last_chapter,
                last_volume=excluded.last_volume,
                total_chapters=excluded.total_chapters,
                year=excluded.year,
                cover_url=excluded.cover_url,
                followers=excluded.followers,
                source_updated_at=excluded.source_updated_at",
            params![
                manga.source.name(),
                manga.source_id,
                manga.title,
                alt_json,
                manga.description,
                manga.status.as_str(),
                manga.content_rating.as_str(),
                manga.demographic.map(|d| d.as_str()),
                manga.original_language,
                manga.last_chapter,
                manga.last_volume,
                manga.total_chapters,
                manga.year,
                manga.cover_url,
                manga.followers,
                manga.source_updated_at.map(|dt| dt.timestamp()),
            ],
        )?;

        for tag in &manga.tags {
            tx.execute(
                "INSERT INTO tags (source, tag_id, name, tag_group) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source, tag_id) DO UPDATE SET
                    name=excluded.name, tag_group=excluded.tag_group",
                params![manga.source.name(), tag.id, tag.name, tag.group.as_str()],
            )?;
        }

        // Replace, never append.
        tx.execute(
            "DELETE FROM manga_tags WHERE source = ?1 AND source_id = ?2",
            params![manga.source.name(), manga.source_id],
        )?;
        for tag in &manga.tags {
            tx.execute(
                "INSERT OR IGNORE INTO manga_tags (source, source_id, tag_id) VALUES (?1, ?2, ?3)",
                params![manga.source.name(), manga.source_id, tag.id],
            )?;
        }
    }
    tx.commit()
}

pub fn get_manga(conn: &Connection, source: Source, source_id: &str) -> Result<Option<CanonicalManga>> {
    let sql = format!("SELECT {} FROM manga WHERE source = ?1 AND source_id = ?2", MANGA_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![source.name(), source_id], row_to_manga)?;
    match rows.next() {
        Some(row) => {
            let mut manga = row?;
            manga.tags = load_tags(conn, source, &manga.source_id)?;
            Ok(Some(manga))
        }
        None => Ok(None),
    }
}

/// Scalar-filtered read in insertion (rowid) order; the search engine's
/// final tiebreak depends on that order being stable.
pub fn candidates(conn: &Connection, filter: &CandidateFilter) -> Result<Vec<CanonicalManga>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(rating) = filter.content_rating {
        clauses.push("content_rating = ?");
        values.push(Box::new(rating.as_str().to_string()));
    }
    if let Some(demo) = filter.demographic {
        clauses.push("demographic = ?");
        values.push(Box::new(demo.as_str().to_string()));
    }
    if let Some(ref lang) = filter.original_language {
        clauses.push("lower(coalesce(original_language, '')) = lower(?)");
        values.push(Box::new(lang.clone()));
    }
    if let Some(min) = filter.min_chapters {
        clauses.push("coalesce(total_chapters, 0) >= ?");
        values.push(Box::new(min));
    }
    if let Some(y) = filter.year_min {
        clauses.push("year >= ?");
        values.push(Box::new(y));
    }
    if let Some(y) = filter.year_max {
        clauses.push("year <= ?");
        values.push(Box::new(y));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("SELECT {} FROM manga{} ORDER BY rowid", MANGA_COLUMNS, where_clause);

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), row_to_manga)?;
    let mut out = Vec::new();
    for row in rows {
        let mut manga = row?;
        manga.tags = load_tags(conn, manga.source, &manga.source_id)?;
        out.push(manga);
    }
    Ok(out)
}

pub fn count_manga(conn: &Connection, source: Option<Source>) -> Result<u64> {
    match source {
        Some(s) => conn.query_row(
            "SELECT COUNT(*) FROM manga WHERE source = ?1",
            params![s.name()],
            |row| row.get(0),
        ),
        None => conn.query_row("SELECT COUNT(*) FROM manga", [], |row| row.get(0)),
    }
}

pub fn get_progress(conn: &Connection, source: Source) -> Result<SyncProgress> {
    let mut stmt = conn.prepare(
        "SELECT status, mode, total_processed, total_to_process, current_offset, last_error,
                started_at, completed_at
         FROM sync_progress WHERE source = ?1",
    )?;
    let mut rows = stmt.query_map(params![source.name()], |row| {
        let status_raw: String = row.get(0)?;
        let mode_raw: Option<String> = row.get(1)?;
        Ok(SyncProgress {
            status: SyncStatus::parse(&status_raw),
            mode: mode_raw.as_deref().and_then(SyncMode::parse),
            total_processed: row.get::<_, i64>(2)? as u64,
            total_to_process: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
            current_offset: row.get::<_, i64>(4)? as u64,
            last_error: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    })?;
    match rows.next() {
        Some(row) => row,
        None => Ok(SyncProgress::default()),
    }
}

pub fn put_progress(conn: &Connection, source: Source, progress: &SyncProgress) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_progress (source, status, mode, total_processed, total_to_process,
            current_offset, last_error, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(source) DO UPDATE SET
            status=excluded.status,
            mode=excluded.mode,
            total_processed=excluded.total_processed,
            total_to_process=excluded.total_to_process,
            current_offset=excluded.current_offset,
            last_error=excluded.last_error,
            started_at=excluded.started_at,
            completed_at=excluded.completed_at",
        params![
            source.name(),
            progress.status.as_str(),
            progress.mode.map(|m| m.as_str()),
            progress.total_processed as i64,
            progress.total_to_process.map(|v| v as i64),
            progress.current_offset as i64,
            progress.last_error,
            progress.started_at,
            progress.completed_at,
        ],
    )?;
    Ok(())
}

pub fn get_watermark(conn: &Connection, source: Source) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT watermark FROM sync_progress WHERE source = ?1")?;
    let mut rows = stmt.query_map(params![source.name()], |row| row.get::<_, Option<i64>>(0))?;
    match rows.next() {
        Some(row) => row,
        None => Ok(None),
    }
}

pub fn set_watermark(conn: &Connection, source: Source, watermark: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_progress (source, watermark) VALUES (?1, ?2)
         ON CONFLICT(source) DO UPDATE SET watermark=excluded.watermark",
        params![source.name(), watermark],
    )?;
    Ok(())
}
