use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::MediaKind;

/// Filesystem area holding one thumbnail artifact per media record.
///
/// An artifact's mtime mirrors the record's `last_modified`; that equality
/// (to the millisecond) is what makes a cached artifact valid.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_size: u64,
    pub file_count: usize,
}

impl ThumbnailCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.thumbnail_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, id: i64, kind: MediaKind) -> PathBuf {
        self.dir.join(format!("{id}.{}", artifact_extension(kind)))
    }

    /// The artifact exists and carries `token` as its modification time, to
    /// the millisecond. See [`truncate_to_millis`] for coarse filesystems.
    pub fn is_fresh(&self, artifact: &Path, token: DateTime<Utc>) -> Result<bool> {
        Ok(self.modified(artifact)?.is_some_and(|mtime| same_instant(mtime, token)))
    }

    /// Modification time of an artifact, or `None` when it doesn't exist.
    pub fn modified(&self, artifact: &Path) -> Result<Option<DateTime<Utc>>> {
        match fs::metadata(artifact) {
            Ok(meta) => Ok(Some(from_file_time(FileTime::from_last_modification_time(&meta)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(artifact, e)),
        }
    }

    /// A scratch file next to `artifact`, with the same extension, for
    /// generators to write into before [`commit`](Self::commit).
    pub fn temp_file(&self, artifact: &Path) -> Result<NamedTempFile> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let suffix = artifact
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        tempfile::Builder::new()
            .prefix(".thumb-")
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::io(&self.dir, e))
    }

    /// Stamp the finished scratch file with `token` and move it into place.
    pub fn commit(&self, temp: NamedTempFile, artifact: &Path, token: DateTime<Utc>) -> Result<()> {
        let time = to_file_time(token);
        filetime::set_file_times(temp.path(), time, time).map_err(|e| Error::io(temp.path(), e))?;

        // rename(2) keeps the mtime we just set
        temp.persist(artifact).map_err(|e| Error::io(artifact, e.error))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheStats::default()),
            Err(e) => return Err(Error::io(&self.dir, e)),
        };

        let mut stats = CacheStats::default();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.dir, e))?;
            let metadata = entry.metadata().map_err(|e| Error::io(entry.path(), e))?;
            if metadata.is_file() {
                stats.total_size += metadata.len();
                stats.file_count += 1;
            }
        }

        Ok(stats)
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&self.dir, e)),
        }
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        tracing::info!(dir = %self.dir.display(), "Cleared thumbnail cache");

        Ok(())
    }
}

fn artifact_extension(kind: MediaKind) -> &'static str {
    match kind {
        #[cfg(feature = "animated-thumbnails")]
        MediaKind::Animated => "gif",
        _ => "png",
    }
}

/// Source mtimes are kept to the millisecond so that they survive the
/// catalog and every filesystem that has sub-second timestamps.
///
/// A cache directory on a filesystem with coarser mtimes (FAT's 2 s, some
/// network mounts) cannot hold a token with sub-second digits. Artifacts
/// there never read back as fresh and are regenerated on every request;
/// keep the cache on a filesystem with at least millisecond mtimes.
pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp_millis() == b.timestamp_millis()
}

fn to_file_time(time: DateTime<Utc>) -> FileTime {
    let time = truncate_to_millis(time);
    FileTime::from_unix_time(time.timestamp(), time.timestamp_subsec_nanos())
}

pub(crate) fn from_file_time(time: FileTime) -> DateTime<Utc> {
    DateTime::from_timestamp(time.unix_seconds(), time.nanoseconds()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn token(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_artifact_path() {
        let cache = ThumbnailCache::new("/var/cache/galleria/thumbnails");
        assert_eq!(
            cache.artifact_path(42, MediaKind::Image),
            PathBuf::from("/var/cache/galleria/thumbnails/42.png")
        );
        assert_eq!(
            cache.artifact_path(7, MediaKind::Video),
            PathBuf::from("/var/cache/galleria/thumbnails/7.png")
        );
    }

    #[test]
    fn test_missing_artifact_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path());
        let artifact = cache.artifact_path(1, MediaKind::Image);
        assert!(!cache.is_fresh(&artifact, token(1_600_000_000_000)).unwrap());
        assert!(cache.modified(&artifact).unwrap().is_none());
    }

    #[test]
    fn test_commit_stamps_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbnails"));
        let artifact = cache.artifact_path(1, MediaKind::Image);
        let t1 = token(1_600_000_000_250);

        let mut temp = cache.temp_file(&artifact).unwrap();
        temp.write_all(b"png bytes").unwrap();
        cache.commit(temp, &artifact, t1).unwrap();

        assert_eq!(std::fs::read(&artifact).unwrap(), b"png bytes");
        assert_eq!(cache.modified(&artifact).unwrap(), Some(t1));
        assert!(cache.is_fresh(&artifact, t1).unwrap());
        assert!(!cache.is_fresh(&artifact, token(1_600_000_000_251)).unwrap());
    }

    #[test]
    fn test_stats_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbnails"));
        assert_eq!(cache.stats().unwrap(), CacheStats::default());

        for id in 1..=3 {
            let artifact = cache.artifact_path(id, MediaKind::Image);
            let mut temp = cache.temp_file(&artifact).unwrap();
            temp.write_all(&[0u8; 10]).unwrap();
            cache.commit(temp, &artifact, token(0)).unwrap();
        }
        assert_eq!(cache.stats().unwrap(), CacheStats { total_size: 30, file_count: 3 });

        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
        assert!(cache.dir().is_dir());
    }

    #[test]
    fn test_coarse_mtime_is_never_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path());
        let artifact = cache.artifact_path(1, MediaKind::Image);
        let precise = token(1_600_000_001_250);

        let mut temp = cache.temp_file(&artifact).unwrap();
        temp.write_all(b"png bytes").unwrap();
        cache.commit(temp, &artifact, precise).unwrap();

        // What a FAT volume would keep of the stamp
        filetime::set_file_mtime(&artifact, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        assert!(!cache.is_fresh(&artifact, precise).unwrap());
    }

    #[test]
    fn test_truncate_to_millis() {
        let precise = Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap();
        assert_eq!(truncate_to_millis(precise), token(1_600_000_000_123));
    }
}
