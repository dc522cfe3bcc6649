use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use image::ImageReader;

use crate::commands::cache::truncate_to_millis;
use crate::error::{Error, Result};
use crate::models::{MediaKind, NewMedia};
use crate::utils::{extract_date_taken, hash_file, Detection, FfmpegTools};

/// Type-specific attributes of one source file, ready to become a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMedia {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub checksum: String,
    pub last_modified: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
}

impl ExtractedMedia {
    pub fn into_new_media(self, path: &Path, mimetype: &str) -> NewMedia {
        NewMedia {
            path: path.to_path_buf(),
            name: self.name,
            description: None,
            width: self.width,
            height: self.height,
            mimetype: mimetype.to_string(),
            size: self.size,
            checksum: self.checksum,
            last_modified: self.last_modified,
            taken_at: self.taken_at,
            duration: self.duration,
        }
    }
}

/// Extract metadata for a sniffed file, dispatching on its kind.
pub async fn extract(path: &Path, detection: &Detection, tools: &FfmpegTools) -> Result<ExtractedMedia> {
    match detection.kind {
        MediaKind::Video => extract_video(path, tools).await,
        MediaKind::Image | MediaKind::Animated => {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || extract_image(&path)).await?
        }
        MediaKind::Unknown => Err(Error::Unsupported {
            path: path.to_path_buf(),
            mimetype: detection.mime.clone(),
        }),
    }
}

/// Header-only decode for dimensions; no pixels are read.
pub fn extract_image(path: &Path) -> Result<ExtractedMedia> {
    let reader = ImageReader::open(path)
        .map_err(|e| Error::io(path, e))?
        .with_guessed_format()
        .map_err(|e| Error::io(path, e))?;
    let (width, height) = reader.into_dimensions().map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    check_dimensions(path, width, height)?;

    let (size, last_modified) = stat(path)?;

    Ok(ExtractedMedia {
        name: display_name(path),
        width,
        height,
        size,
        checksum: hash_file(path)?,
        last_modified,
        taken_at: extract_date_taken(path),
        duration: None,
    })
}

pub async fn extract_video(path: &Path, tools: &FfmpegTools) -> Result<ExtractedMedia> {
    let probe = tools.probe(path).await?;
    let stream = probe.video_stream().ok_or_else(|| Error::Probe {
        path: path.to_path_buf(),
        reason: "no video stream".to_string(),
    })?;
    let (width, height) = (stream.width.unwrap_or(0), stream.height.unwrap_or(0));
    check_dimensions(path, width, height)?;

    let (fs_size, last_modified) = stat(path)?;
    // The container's own idea of its size wins over stat
    let size = probe.container_size().unwrap_or(fs_size);

    let owned = path.to_path_buf();
    let checksum = tokio::task::spawn_blocking(move || hash_file(&owned)).await??;

    Ok(ExtractedMedia {
        name: display_name(path),
        width,
        height,
        size,
        checksum,
        last_modified,
        taken_at: None,
        duration: probe.duration(),
    })
}

fn check_dimensions(path: &Path, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions {
            path: path.to_path_buf(),
            width,
            height,
        });
    }
    Ok(())
}

fn stat(path: &Path) -> Result<(u64, DateTime<Utc>)> {
    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let modified = metadata.modified().map_err(|e| Error::io(path, e))?;
    Ok((metadata.len(), truncate_to_millis(DateTime::<Utc>::from(modified))))
}

/// Source mtime at the precision records store it.
pub(crate) fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    stat(path).map(|(_, modified)| modified)
}

/// Basename without its extension.
pub fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{detect, hash_bytes};
    use std::time::Duration;

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]))
            .save_with_format(path, image::ImageFormat::Jpeg)
            .unwrap();
    }

    #[test]
    fn test_extract_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        write_jpeg(&path, 1200, 800);

        let meta = extract_image(&path).unwrap();
        assert_eq!(meta.name, "a");
        assert_eq!((meta.width, meta.height), (1200, 800));
        assert_eq!(meta.size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(meta.checksum, hash_bytes(&std::fs::read(&path).unwrap()));
        assert_eq!(meta.last_modified.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(meta.duration.is_none());
    }

    #[test]
    fn test_extract_image_with_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        write_jpeg(&dir.path().join("tmp.jpg"), 64, 48);
        std::fs::rename(dir.path().join("tmp.jpg"), &path).unwrap();

        let meta = extract_image(&path).unwrap();
        assert_eq!((meta.width, meta.height), (64, 48));
        assert_eq!(meta.name, "notes");
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        // A PNG signature followed by garbage instead of an IHDR chunk
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nthis is not an IHDR chunk").unwrap();

        let err = extract_image(&path).unwrap_err();
        assert!(err.is_decode(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_extract_dispatches_images_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.jpeg");
        write_jpeg(&path, 10, 20);
        let tools = FfmpegTools::new("ffmpeg", "ffprobe", Duration::from_secs(5));

        let detection = detect(&path).unwrap();
        let meta = extract(&path, &detection, &tools).await.unwrap();
        assert_eq!((meta.width, meta.height), (10, 20));
    }

    #[tokio::test]
    async fn test_video_probe_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypisom").unwrap();
        let tools = FfmpegTools::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe", Duration::from_secs(5));

        let detection = detect(&path).unwrap();
        let err = extract(&path, &detection, &tools).await.unwrap_err();
        assert!(err.is_probe());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/photos/2020/IMG_0001.JPG")), "IMG_0001");
        assert_eq!(display_name(Path::new("/photos/archive.tar.gz")), "archive.tar");
        assert_eq!(display_name(Path::new("/photos/noext")), "noext");
    }
}
