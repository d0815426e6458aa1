use crate::error::ScrapeError;
use crate::job::{JobStatus, ScrapeJob};
use crate::models::{Chapter, ChapterDefaults, Series, SeriesDefaults};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Connection shared by handlers, workers and the orchestrator
pub type Db = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> Db {
    Arc::new(Mutex::new(conn))
}

/// Run `f` with the connection locked; never hold the guard across an await
pub fn with_conn<T>(db: &Db, f: impl FnOnce(&Connection) -> Result<T>) -> std::result::Result<T, ScrapeError> {
    let conn = db.lock().map_err(|_| ScrapeError::LockPoisoned)?;
    Ok(f(&conn)?)
}

pub fn init_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    create_tables(&conn)?;
    Ok(conn)
}

/// In-memory database with the schema applied
pub fn init_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_tables(&conn)?;
    Ok(conn)
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    log::info!("Creating tables if not exists...");
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            rating REAL NOT NULL DEFAULT 0,
            current_chapter INTEGER NOT NULL DEFAULT 0,
            link TEXT NOT NULL DEFAULT '',
            image_url TEXT NOT NULL DEFAULT '',
            comment TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(owner_id, title)
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            series_id INTEGER NOT NULL,
            chapter_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            release_date TEXT,
            local_folder TEXT NOT NULL DEFAULT '',
            local_image_paths TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (series_id) REFERENCES series (id) ON DELETE CASCADE,
            UNIQUE(series_id, chapter_number)
        );",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scrape_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            source_url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            message TEXT NOT NULL DEFAULT '',
            series_id INTEGER,
            chapters_scraped INTEGER NOT NULL DEFAULT 0,
            images_downloaded INTEGER NOT NULL DEFAULT 0,
            media_root TEXT NOT NULL DEFAULT '',
            started_at INTEGER,
            finished_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (series_id) REFERENCES series (id) ON DELETE SET NULL
        );",
        [],
    )?;

    // Migrations for databases created before these columns existed
    ensure_column(conn, "chapters", "local_folder", "TEXT NOT NULL DEFAULT ''")?;
    ensure_column(conn, "scrape_jobs", "media_root", "TEXT NOT NULL DEFAULT ''")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_owner ON scrape_jobs(owner_id, created_at);",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status ON scrape_jobs(status);",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ch_series ON chapters(series_id);",
        [],
    )?;

    log::info!("Tables ensured.");
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, column_type: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in rows {
        if name? == column {
            return Ok(());
        }
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type),
        [],
    )?;
    Ok(())
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, owner_id, source_url, status, message, series_id, chapters_scraped, \
     images_downloaded, media_root, started_at, finished_at, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> Result<ScrapeJob> {
    let status: String = row.get(3)?;
    let status = status.parse::<JobStatus>().map_err(|e| {
        conversion_error(3, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    Ok(ScrapeJob {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        source_url: row.get(2)?,
        status,
        message: row.get(4)?,
        series_id: row.get(5)?,
        chapters_scraped: row.get(6)?,
        images_downloaded: row.get(7)?,
        media_root: row.get(8)?,
        started_at: row.get(9)?,
        finished_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Store a new job and fill in its id
pub fn insert_job(conn: &Connection, job: &mut ScrapeJob) -> Result<i64> {
    conn.execute(
        "INSERT INTO scrape_jobs (owner_id, source_url, status, message, series_id, chapters_scraped,
            images_downloaded, media_root, started_at, finished_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job.owner_id,
            job.source_url,
            job.status.as_str(),
            job.message,
            job.series_id,
            job.chapters_scraped,
            job.images_downloaded,
            job.media_root,
            job.started_at,
            job.finished_at,
            job.created_at,
            job.updated_at,
        ],
    )?;
    job.id = conn.last_insert_rowid();
    Ok(job.id)
}

/// Write every mutable job field
pub fn save_job(conn: &Connection, job: &ScrapeJob) -> Result<()> {
    conn.execute(
        "UPDATE scrape_jobs SET status = ?2, message = ?3, series_id = ?4, chapters_scraped = ?5,
            images_downloaded = ?6, media_root = ?7, started_at = ?8, finished_at = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            job.id,
            job.status.as_str(),
            job.message,
            job.series_id,
            job.chapters_scraped,
            job.images_downloaded,
            job.media_root,
            job.started_at,
            job.finished_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_job(conn: &Connection, id: i64) -> Result<Option<ScrapeJob>> {
    conn.query_row(
        &format!("SELECT {} FROM scrape_jobs WHERE id = ?1", JOB_COLUMNS),
        params![id],
        job_from_row,
    )
    .optional()
}

/// Job lookup scoped to its owner
pub fn get_job_for_owner(conn: &Connection, owner_id: i64, id: i64) -> Result<Option<ScrapeJob>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM scrape_jobs WHERE id = ?1 AND owner_id = ?2",
            JOB_COLUMNS
        ),
        params![id, owner_id],
        job_from_row,
    )
    .optional()
}

/// Most recent jobs of an owner, newest first
pub fn list_jobs_for_owner(conn: &Connection, owner_id: i64, limit: usize) -> Result<Vec<ScrapeJob>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scrape_jobs WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        JOB_COLUMNS
    ))?;
    let rows = stmt.query_map(params![owner_id, limit], job_from_row)?;
    rows.collect()
}

pub fn jobs_with_status(conn: &Connection, status: JobStatus) -> Result<Vec<ScrapeJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scrape_jobs WHERE status = ?1 ORDER BY id",
        JOB_COLUMNS
    ))?;
    let rows = stmt.query_map(params![status.as_str()], job_from_row)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

const SERIES_COLUMNS: &str = "id, owner_id, title, kind, language, status, rating, current_chapter, \
     link, image_url, comment, created_at, updated_at";

fn series_from_row(row: &Row<'_>) -> Result<Series> {
    Ok(Series {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        kind: row.get(3)?,
        language: row.get(4)?,
        status: row.get(5)?,
        rating: row.get(6)?,
        current_chapter: row.get(7)?,
        link: row.get(8)?,
        image_url: row.get(9)?,
        comment: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub fn get_series(conn: &Connection, id: i64) -> Result<Option<Series>> {
    conn.query_row(
        &format!("SELECT {} FROM series WHERE id = ?1", SERIES_COLUMNS),
        params![id],
        series_from_row,
    )
    .optional()
}

pub fn find_series(conn: &Connection, owner_id: i64, title: &str) -> Result<Option<Series>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM series WHERE owner_id = ?1 AND title = ?2",
            SERIES_COLUMNS
        ),
        params![owner_id, title],
        series_from_row,
    )
    .optional()
}

pub fn count_series(conn: &Connection, owner_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM series WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )
}

/// Get-or-create a series; an existing one only has blank link/cover filled in
pub fn upsert_series(
    conn: &Connection,
    owner_id: i64,
    title: &str,
    defaults: &SeriesDefaults,
    now: i64,
) -> Result<(Series, bool)> {
    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT INTO series (owner_id, title, kind, language, status, rating, current_chapter,
            link, image_url, comment, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(owner_id, title) DO NOTHING",
        params![
            owner_id,
            title,
            defaults.kind,
            defaults.language,
            defaults.status,
            defaults.link,
            defaults.image_url.as_deref().unwrap_or(""),
            defaults.comment,
            now,
        ],
    )?;
    let created = inserted == 1;

    if !created {
        let cover = defaults.image_url.as_deref().unwrap_or("");
        tx.execute(
            "UPDATE series SET
                link = CASE WHEN link = '' THEN ?3 ELSE link END,
                image_url = CASE WHEN image_url = '' THEN ?4 ELSE image_url END,
                updated_at = ?5
             WHERE owner_id = ?1 AND title = ?2
               AND ((link = '' AND ?3 <> '') OR (image_url = '' AND ?4 <> ''))",
            params![owner_id, title, defaults.link, cover, now],
        )?;
    }

    let series = tx.query_row(
        &format!(
            "SELECT {} FROM series WHERE owner_id = ?1 AND title = ?2",
            SERIES_COLUMNS
        ),
        params![owner_id, title],
        series_from_row,
    )?;
    tx.commit()?;
    Ok((series, created))
}

/// Raise the series' current chapter, never lowering it
pub fn advance_current_chapter(conn: &Connection, series_id: i64, chapter_number: u32, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE series SET current_chapter = ?2, updated_at = ?3
         WHERE id = ?1 AND current_chapter < ?2",
        params![series_id, chapter_number, now],
    )?;
    Ok(())
}

/// User-side edit of a series link; here mostly so reruns can be checked against it
pub fn set_series_link(conn: &Connection, series_id: i64, link: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE series SET link = ?2, updated_at = ?3 WHERE id = ?1",
        params![series_id, link, now],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Chapters
// ---------------------------------------------------------------------------

const CHAPTER_COLUMNS: &str = "id, series_id, chapter_number, title, release_date, local_folder, \
     local_image_paths, created_at, updated_at";

fn chapter_from_row(row: &Row<'_>) -> Result<Chapter> {
    let release_date: Option<String> = row.get(4)?;
    let release_date = release_date
        .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| conversion_error(4, e)))
        .transpose()?;
    let paths: String = row.get(6)?;
    let local_image_paths: Vec<String> =
        serde_json::from_str(&paths).map_err(|e| conversion_error(6, e))?;
    Ok(Chapter {
        id: row.get(0)?,
        series_id: row.get(1)?,
        chapter_number: row.get(2)?,
        title: row.get(3)?,
        release_date,
        local_folder: row.get(5)?,
        local_image_paths,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Update-or-create a chapter; scraper-owned fields are replaced
pub fn upsert_chapter(
    conn: &Connection,
    series_id: i64,
    chapter_number: u32,
    defaults: &ChapterDefaults,
    now: i64,
) -> Result<(Chapter, bool)> {
    let paths = serde_json::to_string(&defaults.local_image_paths)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let release_date = defaults.release_date.map(|d| d.format("%Y-%m-%d").to_string());

    let tx = conn.unchecked_transaction()?;
    let existed: bool = tx
        .query_row(
            "SELECT 1 FROM chapters WHERE series_id = ?1 AND chapter_number = ?2",
            params![series_id, chapter_number],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    tx.execute(
        "INSERT INTO chapters (series_id, chapter_number, title, release_date, local_folder,
            local_image_paths, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(series_id, chapter_number) DO UPDATE SET
            title = excluded.title,
            release_date = excluded.release_date,
            local_folder = excluded.local_folder,
            local_image_paths = excluded.local_image_paths,
            updated_at = excluded.updated_at",
        params![
            series_id,
            chapter_number,
            defaults.title,
            release_date,
            defaults.local_folder,
            paths,
            now,
        ],
    )?;

    let chapter = tx.query_row(
        &format!(
            "SELECT {} FROM chapters WHERE series_id = ?1 AND chapter_number = ?2",
            CHAPTER_COLUMNS
        ),
        params![series_id, chapter_number],
        chapter_from_row,
    )?;
    tx.commit()?;
    Ok((chapter, !existed))
}

/// Chapters of a series in reading order
pub fn list_chapters(conn: &Connection, series_id: i64) -> Result<Vec<Chapter>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chapters WHERE series_id = ?1 ORDER BY chapter_number",
        CHAPTER_COLUMNS
    ))?;
    let rows = stmt.query_map(params![series_id], chapter_from_row)?;
    rows.collect()
}
