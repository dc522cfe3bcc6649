use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{MediaRecord, NewMedia};

/// The record store the pipeline reads from and writes to.
///
/// Implementations must enforce path uniqueness: a second `create` for the
/// same path fails with [`Error::DuplicatePath`].
pub trait Catalog: Send + Sync {
    fn find_by_path(&self, path: &Path) -> Result<Option<MediaRecord>>;

    fn create(&self, media: NewMedia) -> Result<MediaRecord>;

    fn get(&self, id: i64) -> Result<Option<MediaRecord>>;

    /// Other records with identical content, in insertion order.
    fn find_by_checksum(&self, checksum: &str) -> Result<Vec<MediaRecord>>;

    fn all(&self) -> Result<Vec<MediaRecord>>;

    fn count(&self) -> Result<u64>;
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

const COLUMNS: &str = "id, path, name, description, width, height, mimetype, size,
                       checksum, last_modified, taken_at, duration, created_at";

impl SqliteCatalog {
    pub fn open(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                description TEXT,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                mimetype TEXT NOT NULL,
                size INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                taken_at TEXT,
                duration REAL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_media_checksum ON media(checksum)",
            [],
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-written that sqlite won't roll back
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let path: String = row.get(1)?;
    let size: i64 = row.get(7)?;

    Ok(MediaRecord {
        id: row.get(0)?,
        path: PathBuf::from(path),
        name: row.get(2)?,
        description: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        mimetype: row.get(6)?,
        size: size.max(0) as u64,
        checksum: row.get(8)?,
        last_modified: row.get(9)?,
        taken_at: row.get(10)?,
        duration: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl Catalog for SqliteCatalog {
    fn find_by_path(&self, path: &Path) -> Result<Option<MediaRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM media WHERE path = ?1"))?;
        let record = stmt
            .query_row([path.to_string_lossy()], row_to_record)
            .optional()?;

        Ok(record)
    }

    fn create(&self, media: NewMedia) -> Result<MediaRecord> {
        let conn = self.conn();
        let created_at = Utc::now();

        let inserted = conn.execute(
            "INSERT INTO media
             (path, name, description, width, height, mimetype, size, checksum,
              last_modified, taken_at, duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                media.path.to_string_lossy(),
                media.name,
                media.description,
                media.width,
                media.height,
                media.mimetype,
                i64::try_from(media.size).unwrap_or(i64::MAX),
                media.checksum,
                media.last_modified,
                media.taken_at,
                media.duration,
                created_at,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(Error::DuplicatePath(media.path));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(MediaRecord {
            id: conn.last_insert_rowid(),
            path: media.path,
            name: media.name,
            description: media.description,
            width: media.width,
            height: media.height,
            mimetype: media.mimetype,
            size: media.size,
            checksum: media.checksum,
            last_modified: media.last_modified,
            taken_at: media.taken_at,
            duration: media.duration,
            created_at,
        })
    }

    fn get(&self, id: i64) -> Result<Option<MediaRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM media WHERE id = ?1"))?;
        let record = stmt.query_row([id], row_to_record).optional()?;

        Ok(record)
    }

    fn find_by_checksum(&self, checksum: &str) -> Result<Vec<MediaRecord>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {COLUMNS} FROM media WHERE checksum = ?1 ORDER BY id"))?;
        let records = stmt
            .query_map([checksum], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn all(&self) -> Result<Vec<MediaRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM media ORDER BY id"))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn new_media(path: &str, checksum: &str) -> NewMedia {
        NewMedia {
            path: PathBuf::from(path),
            name: "a".to_string(),
            description: None,
            width: 1200,
            height: 800,
            mimetype: "image/jpeg".to_string(),
            size: 4096,
            checksum: checksum.to_string(),
            last_modified: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            taken_at: None,
            duration: None,
        }
    }

    #[test]
    fn test_create_and_find() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        assert!(catalog.find_by_path(Path::new("/photos/a.jpg")).unwrap().is_none());

        let created = catalog.create(new_media("/photos/a.jpg", "00ff")).unwrap();
        let found = catalog.find_by_path(Path::new("/photos/a.jpg")).unwrap().unwrap();

        assert_eq!(found, created);
        assert_eq!(catalog.get(created.id).unwrap(), Some(created));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_path_is_unique() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.create(new_media("/photos/a.jpg", "00ff")).unwrap();

        let err = catalog.create(new_media("/photos/a.jpg", "1234")).unwrap_err();
        assert!(matches!(err, Error::DuplicatePath(ref p) if p == Path::new("/photos/a.jpg")));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_timestamps_round_trip() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut media = new_media("/videos/b.mp4", "abcd");
        media.taken_at = Some(Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
        media.duration = Some(12.5);
        let created = catalog.create(media.clone()).unwrap();

        let found = catalog.get(created.id).unwrap().unwrap();
        assert_eq!(found.last_modified, media.last_modified);
        assert_eq!(found.taken_at, media.taken_at);
        assert_eq!(found.duration, Some(12.5));
    }

    #[test]
    fn test_find_by_checksum() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let first = catalog.create(new_media("/a/one.jpg", "same")).unwrap();
        let second = catalog.create(new_media("/b/copy.jpg", "same")).unwrap();
        catalog.create(new_media("/c/other.jpg", "different")).unwrap();

        assert_eq!(catalog.find_by_checksum("same").unwrap(), vec![first, second]);
        assert_eq!(catalog.all().unwrap().len(), 3);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("galleria.db");
        {
            let catalog = SqliteCatalog::open(&db_path).unwrap();
            catalog.create(new_media("/photos/a.jpg", "00ff")).unwrap();
        }
        let reopened = SqliteCatalog::open(&db_path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
