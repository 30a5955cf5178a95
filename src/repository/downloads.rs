//! Metadata store of completed downloads.
//!
//! Used as a local idempotency cache: a row means "already downloaded",
//! but only while its file still exists. Rows pointing at missing files
//! are purged the moment they are looked at.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{connect, parse_datetime, RepositoryError, Result};
use crate::models::DownloadRecord;

const SELECT_COLUMNS: &str = "source_name, source_key, title, attribution, tags, topic,
     original_url, file_path, content_hash, sequence_number, width, height, downloaded_at";

/// SQLite-backed download repository.
pub struct DownloadRepository {
    conn: Mutex<Connection>,
}

impl DownloadRepository {
    /// Open (or create) the store at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(connect(db_path)?)
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                source_name TEXT NOT NULL,
                source_key TEXT NOT NULL,
                title TEXT,
                attribution TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                topic TEXT NOT NULL,
                original_url TEXT NOT NULL,
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                downloaded_at TEXT NOT NULL,
                PRIMARY KEY (source_name, source_key)
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_hash ON downloads(content_hash);
            CREATE INDEX IF NOT EXISTS idx_downloads_time ON downloads(downloaded_at);
        "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<DownloadRecord> {
        let tags: String = row.get(4)?;
        let file_path: String = row.get(7)?;
        let downloaded_at: String = row.get(12)?;
        Ok(DownloadRecord {
            source_name: row.get(0)?,
            source_key: row.get(1)?,
            title: row.get(2)?,
            attribution: row.get(3)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            topic: row.get(5)?,
            original_url: row.get(6)?,
            file_path: PathBuf::from(file_path),
            content_hash: row.get(8)?,
            sequence_number: row.get::<_, i64>(9)? as u64,
            width: row.get::<_, i64>(10)? as u32,
            height: row.get::<_, i64>(11)? as u32,
            downloaded_at: parse_datetime(&downloaded_at),
        })
    }

    /// Return the record for an item if it was downloaded and its file is
    /// still on disk. A record whose file is gone is deleted and `None`
    /// is returned.
    pub fn lookup(&self, source_name: &str, source_key: &str) -> Result<Option<DownloadRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM downloads WHERE source_name = ? AND source_key = ?",
                    SELECT_COLUMNS
                ),
                params![source_name, source_key],
                Self::row_to_record,
            )
            .optional()?;

        match record {
            Some(r) if r.file_path.exists() => Ok(Some(r)),
            Some(r) => {
                debug!(
                    "purging stale record {}/{} ({} missing)",
                    source_name,
                    source_key,
                    r.file_path.display()
                );
                conn.execute(
                    "DELETE FROM downloads WHERE source_name = ? AND source_key = ?",
                    params![source_name, source_key],
                )?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Insert or replace a record.
    pub fn record(&self, record: &DownloadRecord) -> Result<()> {
        let tags = serde_json::to_string(&record.tags)?;
        let conn = self.lock()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO downloads
               (source_name, source_key, title, attribution, tags, topic, original_url,
                file_path, content_hash, sequence_number, width, height, downloaded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                record.source_name,
                record.source_key,
                record.title,
                record.attribution,
                tags,
                record.topic,
                record.original_url,
                record.file_path.to_string_lossy(),
                record.content_hash,
                record.sequence_number as i64,
                record.width as i64,
                record.height as i64,
                record.downloaded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Whether some live record already holds this content.
    pub fn contains_hash(&self, content_hash: &str) -> Result<bool> {
        Ok(self.find_by_hash(content_hash)?.is_some())
    }

    /// A live record holding this content, if any. Stale rows found along
    /// the way are purged.
    pub fn find_by_hash(&self, content_hash: &str) -> Result<Option<DownloadRecord>> {
        let conn = self.lock()?;
        let rows: Vec<DownloadRecord> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM downloads WHERE content_hash = ? ORDER BY downloaded_at",
                SELECT_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![content_hash], Self::row_to_record)?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut live = None;
        for record in rows {
            if record.file_path.exists() {
                live.get_or_insert(record);
            } else {
                conn.execute(
                    "DELETE FROM downloads WHERE source_name = ? AND source_key = ?",
                    params![record.source_name, record.source_key],
                )?;
            }
        }
        Ok(live)
    }

    /// Delete a record. Returns whether one existed.
    pub fn remove(&self, source_name: &str, source_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM downloads WHERE source_name = ? AND source_key = ?",
            params![source_name, source_key],
        )?;
        Ok(deleted > 0)
    }

    /// Most recent records first, optionally for one source.
    pub fn list(&self, source_name: Option<&str>, limit: usize) -> Result<Vec<DownloadRecord>> {
        let conn = self.lock()?;
        let limit = limit.min(i64::MAX as usize) as i64;
        let records = match source_name {
            Some(source) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM downloads WHERE source_name = ?
                     ORDER BY downloaded_at DESC, sequence_number DESC LIMIT ?",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![source, limit], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM downloads
                     ORDER BY downloaded_at DESC, sequence_number DESC LIMIT ?",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    /// Number of records, optionally for one source.
    pub fn count(&self, source_name: Option<&str>) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = match source_name {
            Some(source) => conn.query_row(
                "SELECT COUNT(*) FROM downloads WHERE source_name = ?",
                params![source],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM downloads", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Delete every record whose file no longer exists. Returns how many.
    pub fn purge_stale(&self) -> Result<usize> {
        let conn = self.lock()?;
        let rows: Vec<(String, String, String)> = {
            let mut stmt = conn.prepare("SELECT source_name, source_key, file_path FROM downloads")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut purged = 0;
        for (source_name, source_key, file_path) in rows {
            if !Path::new(&file_path).exists() {
                purged += conn.execute(
                    "DELETE FROM downloads WHERE source_name = ? AND source_key = ?",
                    params![source_name, source_key],
                )?;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(key: &str, file_path: PathBuf, hash: &str) -> DownloadRecord {
        DownloadRecord {
            source_name: "pixiv".to_string(),
            source_key: key.to_string(),
            title: Some("Title".to_string()),
            attribution: Some("artist".to_string()),
            tags: vec!["cat".to_string(), "猫".to_string()],
            topic: "cats".to_string(),
            original_url: format!("https://i.example.com/{}.png", key),
            file_path,
            content_hash: hash.to_string(),
            sequence_number: 1,
            width: 800,
            height: 600,
            downloaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_lookup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("1_artist.png");
        std::fs::write(&file, b"png").unwrap();

        let repo = DownloadRepository::new(&dir.path().join("db/store.db")).unwrap();
        let rec = record("101_p0", file, "h1");
        repo.record(&rec).unwrap();

        let found = repo.lookup("pixiv", "101_p0").unwrap().unwrap();
        assert_eq!(found.tags, rec.tags);
        assert_eq!(found.width, 800);
        assert_eq!(found.downloaded_at.timestamp(), rec.downloaded_at.timestamp());
        assert!(repo.lookup("pixiv", "missing").unwrap().is_none());
        assert!(repo.lookup("giphy", "101_p0").unwrap().is_none());
    }

    #[test]
    fn test_lookup_purges_stale_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DownloadRepository::in_memory().unwrap();
        repo.record(&record("1", dir.path().join("gone.png"), "h1")).unwrap();
        assert_eq!(repo.count(None).unwrap(), 1);

        assert!(repo.lookup("pixiv", "1").unwrap().is_none());
        assert_eq!(repo.count(None).unwrap(), 0);
    }

    #[test]
    fn test_contains_hash_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.png");
        std::fs::write(&live, b"x").unwrap();

        let repo = DownloadRepository::in_memory().unwrap();
        repo.record(&record("1", live, "same")).unwrap();
        repo.record(&record("2", dir.path().join("gone.png"), "orphan")).unwrap();

        assert!(repo.contains_hash("same").unwrap());
        assert!(!repo.contains_hash("orphan").unwrap());
        assert!(!repo.contains_hash("never").unwrap());
        assert_eq!(repo.count(Some("pixiv")).unwrap(), 1);
    }

    #[test]
    fn test_find_by_hash_returns_live_record() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.png");
        std::fs::write(&live, b"x").unwrap();

        let repo = DownloadRepository::in_memory().unwrap();
        repo.record(&record("old", dir.path().join("gone.png"), "same")).unwrap();
        repo.record(&record("new", live.clone(), "same")).unwrap();

        let found = repo.find_by_hash("same").unwrap().unwrap();
        assert_eq!(found.source_key, "new");
        assert_eq!(found.file_path, live);
        assert_eq!(repo.count(None).unwrap(), 1);
        assert!(repo.find_by_hash("other").unwrap().is_none());
    }

    #[test]
    fn test_list_remove_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("live.png");
        std::fs::write(&live, b"x").unwrap();

        let repo = DownloadRepository::in_memory().unwrap();
        repo.record(&record("1", live.clone(), "a")).unwrap();
        repo.record(&record("2", dir.path().join("gone-1.png"), "b")).unwrap();
        repo.record(&record("3", dir.path().join("gone-2.png"), "c")).unwrap();

        assert_eq!(repo.list(None, 10).unwrap().len(), 3);
        assert_eq!(repo.list(Some("pixiv"), 2).unwrap().len(), 2);
        assert!(repo.list(Some("giphy"), 10).unwrap().is_empty());

        assert_eq!(repo.purge_stale().unwrap(), 2);
        assert!(repo.remove("pixiv", "1").unwrap());
        assert!(!repo.remove("pixiv", "1").unwrap());
        assert_eq!(repo.count(None).unwrap(), 0);
    }
}
