//! sqlite-adapter: SQLite implementation of the document-store ports for local/dev.
//!
//! Purpose
//! - Provide a lightweight, file-based store to run the gate locally without
//!   cloud dependencies.
//! - Implements `LinkRepository` and `StatsRepository` from the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - Stores timestamps as milliseconds since UNIX_EPOCH.
//! - The visitor counter is a single row (`id = 'global'`) incremented inside a
//!   transaction, so concurrent viewers never lose updates.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{CoreError, Link, LinkRepository, StatsRepository, Token, VisitorStats, STATS_ID};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// SQLite-backed store for local development.
pub struct SqliteRepo {
    conn: std::sync::Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    /// Open at `path`, creating parent directories first.
    pub fn open_creating_dirs<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| CoreError::Persistence(format!("create {}: {e}", dir.display())))?;
            }
        }
        Self::new(path)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn.lock().map_err(|_| CoreError::Persistence("mutex poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            token TEXT PRIMARY KEY,
            content_url TEXT NOT NULL,
            ads_url TEXT NOT NULL,
            image_url TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS stats (
            id TEXT PRIMARY KEY,
            total INTEGER NOT NULL
        );
        "#,
    )
    .map_err(map_sqerr)
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Persistence(format!("sqlite error: {e}"))
}

fn system_time_to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
}

fn millis_to_system_time(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

fn row_to_link(row: &rusqlite::Row) -> Result<Link, CoreError> {
    let token: String = row.get(0).map_err(map_sqerr)?;
    let content_url: String = row.get(1).map_err(map_sqerr)?;
    let ads_url: String = row.get(2).map_err(map_sqerr)?;
    let image_url: String = row.get(3).map_err(map_sqerr)?;
    let created_at: i64 = row.get(4).map_err(map_sqerr)?;

    let token = Token::new(token).map_err(|e| CoreError::Persistence(format!("bad token in db: {e}")))?;
    Ok(Link {
        token,
        content_url,
        ads_url,
        image_url,
        created_at: millis_to_system_time(created_at),
    })
}

impl LinkRepository for SqliteRepo {
    fn get(&self, token: &Token) -> Result<Option<Link>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT token, content_url, ads_url, image_url, created_at FROM links WHERE token = ?1")
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![token.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_link(row)?))
        } else {
            Ok(None)
        }
    }

    fn put(&self, link: Link) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let res = conn.execute(
            "INSERT INTO links(token, content_url, ads_url, image_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.token.as_str(),
                link.content_url,
                link.ads_url,
                link.image_url,
                system_time_to_millis(link.created_at),
            ],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CoreError::AlreadyExists)
            }
            Err(e) => Err(map_sqerr(e)),
        }
    }
}

impl StatsRepository for SqliteRepo {
    fn load_or_init(&self) -> Result<VisitorStats, CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO stats(id, total) VALUES(?1, 0)",
            params![STATS_ID],
        )
        .map_err(map_sqerr)?;
        let total: Option<i64> = conn
            .query_row("SELECT total FROM stats WHERE id = ?1", params![STATS_ID], |row| row.get(0))
            .optional()
            .map_err(map_sqerr)?;
        Ok(VisitorStats { total: total.unwrap_or(0).max(0) as u64 })
    }

    fn increment(&self) -> Result<VisitorStats, CoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        tx.execute(
            "INSERT OR IGNORE INTO stats(id, total) VALUES(?1, 0)",
            params![STATS_ID],
        )
        .map_err(map_sqerr)?;
        tx.execute("UPDATE stats SET total = total + 1 WHERE id = ?1", params![STATS_ID])
            .map_err(map_sqerr)?;
        let total: i64 = tx
            .query_row("SELECT total FROM stats WHERE id = ?1", params![STATS_ID], |row| row.get(0))
            .map_err(map_sqerr)?;
        tx.commit().map_err(map_sqerr)?;
        debug!(total, "visitor counter incremented");
        Ok(VisitorStats { total: total.max(0) as u64 })
    }
}
