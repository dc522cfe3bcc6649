use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::commands::metadata::{extract_image, extract_video, modified_at, ExtractedMedia};
use crate::config::{Config, ErrorPolicy};
use crate::db::Catalog;
use crate::error::{Error, Result};
use crate::models::{MediaKind, MediaRecord};
use crate::utils::{detect, Detection, FfmpegTools};

/// Every regular file under `root`, as absolute paths, in a stable order.
///
/// Symlinks are neither followed nor returned, so no file is visited twice.
/// Unreadable directories abort the walk.
pub fn walk(root: &Path) -> Result<Vec<PathBuf>> {
    let root = fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
    let mut files = Vec::new();

    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        } else if entry.path_is_symlink() {
            tracing::debug!(path = %entry.path().display(), "Skipping symlink");
        }
    }

    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub parallel_extraction: bool,
    pub on_decode_error: ErrorPolicy,
    pub on_probe_error: ErrorPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallel_extraction: config.parallel_extraction,
            on_decode_error: config.on_decode_error,
            on_probe_error: config.on_probe_error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Unrecognized {
    pub path: PathBuf,
    pub mimetype: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Regular files the walk turned up.
    pub discovered: usize,
    pub created: Vec<MediaRecord>,
    /// Files that already had a record.
    pub existing: usize,
    pub unrecognized: Vec<Unrecognized>,
    /// Files skipped under [`ErrorPolicy::Skip`].
    pub failed: Vec<FailedFile>,
}

/// Brings the catalog in line with a directory tree: one record per media
/// file, created the first time the file is seen and never again.
pub struct Scanner {
    catalog: Arc<dyn Catalog>,
    tools: FfmpegTools,
    options: ScanOptions,
}

impl Scanner {
    pub fn new(catalog: Arc<dyn Catalog>, tools: FfmpegTools, options: ScanOptions) -> Self {
        Self { catalog, tools, options }
    }

    pub fn from_config(catalog: Arc<dyn Catalog>, config: &Config) -> Self {
        Self::new(catalog, FfmpegTools::from_config(config), ScanOptions::from_config(config))
    }

    pub async fn ingest(&self, root: &Path) -> Result<IngestReport> {
        let owned_root = root.to_path_buf();
        let paths = tokio::task::spawn_blocking(move || walk(&owned_root)).await??;
        tracing::info!(root = %root.display(), files = paths.len(), "Scanning folder");

        let mut report = IngestReport {
            discovered: paths.len(),
            ..IngestReport::default()
        };

        let mut pending = Vec::new();
        for path in paths {
            let detection = detect(&path)?;
            if !detection.kind.is_media() {
                tracing::warn!(path = %path.display(), mimetype = %detection.mime, "Invalid file type; skipping");
                report.unrecognized.push(Unrecognized {
                    path,
                    mimetype: detection.mime,
                });
                continue;
            }

            if let Some(existing) = self.catalog.find_by_path(&path)? {
                self.note_if_changed(&existing);
                report.existing += 1;
                continue;
            }

            pending.push((path, detection));
        }

        for (path, detection, still) in self.extract_stills(pending).await? {
            let extracted = match still {
                Some(result) => result,
                None => extract_video(&path, &self.tools).await,
            };

            match extracted {
                Ok(media) => match self.create_if_absent(&path, &detection, media)? {
                    Some(record) => report.created.push(record),
                    None => report.existing += 1,
                },
                Err(err) => match self.policy_for(&detection, &err) {
                    Some(ErrorPolicy::Skip) => {
                        tracing::warn!(path = %path.display(), error = %err, "Could not read media; skipping");
                        report.failed.push(FailedFile {
                            path,
                            error: err.to_string(),
                        });
                    }
                    Some(ErrorPolicy::Abort) | None => {
                        tracing::error!(path = %path.display(), error = %err, "Aborting scan");
                        return Err(err);
                    }
                },
            }
        }

        tracing::info!(
            created = report.created.len(),
            existing = report.existing,
            unrecognized = report.unrecognized.len(),
            failed = report.failed.len(),
            "Scan complete"
        );

        Ok(report)
    }

    /// Header-decode every still image off the async runtime, fanned out over
    /// rayon when enabled. Videos come back with an empty slot; they are
    /// probed one at a time by the caller. Walker order is preserved.
    async fn extract_stills(
        &self,
        pending: Vec<(PathBuf, Detection)>,
    ) -> Result<Vec<(PathBuf, Detection, Option<Result<ExtractedMedia>>)>> {
        let parallel = self.options.parallel_extraction;

        let slots = tokio::task::spawn_blocking(move || {
            let extract = |(path, detection): (PathBuf, Detection)| {
                let still = (detection.kind != MediaKind::Video).then(|| extract_image(&path));
                (path, detection, still)
            };

            if parallel {
                pending.into_par_iter().map(extract).collect::<Vec<_>>()
            } else {
                pending.into_iter().map(extract).collect()
            }
        })
        .await?;

        Ok(slots)
    }

    fn create_if_absent(
        &self,
        path: &Path,
        detection: &Detection,
        media: ExtractedMedia,
    ) -> Result<Option<MediaRecord>> {
        if self.catalog.find_by_path(path)?.is_some() {
            return Ok(None);
        }

        if let Some(original) = self.catalog.find_by_checksum(&media.checksum)?.first() {
            tracing::debug!(
                path = %path.display(),
                original = %original.path.display(),
                "Same content is already catalogued elsewhere"
            );
        }

        match self.catalog.create(media.into_new_media(path, &detection.mime)) {
            Ok(record) => {
                tracing::debug!(id = record.id, path = %path.display(), mimetype = %record.mimetype, "Catalogued");
                Ok(Some(record))
            }
            // Lost a race with another writer for the same path
            Err(Error::DuplicatePath(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn policy_for(&self, detection: &Detection, err: &Error) -> Option<ErrorPolicy> {
        let bad_dimensions = matches!(err, Error::InvalidDimensions { .. });
        match detection.kind {
            MediaKind::Video if err.is_probe() || bad_dimensions => Some(self.options.on_probe_error),
            MediaKind::Image | MediaKind::Animated if err.is_decode() || bad_dimensions => {
                Some(self.options.on_decode_error)
            }
            _ => None,
        }
    }

    // Records are never refreshed on re-scan; only thumbnails react to mtime.
    fn note_if_changed(&self, existing: &MediaRecord) {
        if let Ok(modified) = modified_at(&existing.path) {
            if modified != existing.last_modified {
                tracing::debug!(
                    id = existing.id,
                    path = %existing.path.display(),
                    "File changed on disk since it was catalogued; record left as is"
                );
            }
        }
    }
}
