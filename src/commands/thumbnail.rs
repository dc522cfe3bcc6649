use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};

use crate::commands::cache::ThumbnailCache;
use crate::error::{Error, Result};
use crate::models::{MediaKind, MediaRecord};
use crate::utils::FfmpegTools;

/// Every thumbnail is normalized to this height.
pub const THUMBNAIL_HEIGHT: u32 = 350;

/// Produces and caches thumbnails on demand.
///
/// Concurrent requests for the same record wait on a per-record lock, so a
/// stale artifact is regenerated once rather than once per request.
pub struct Thumbnailer {
    cache: ThumbnailCache,
    tools: FfmpegTools,
    in_flight: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

/// Aspect-preserving size for a thumbnail `target_height` pixels tall.
pub fn target_dimensions(width: u32, height: u32, target_height: u32) -> (u32, u32) {
    let scaled = (u64::from(width) * u64::from(target_height)) as f64 / f64::from(height.max(1));
    let width = (scaled.round() as u32).max(1);
    (width, target_height)
}

impl Thumbnailer {
    pub fn new(cache: ThumbnailCache, tools: FfmpegTools) -> Self {
        Self {
            cache,
            tools,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    /// Path to serve as the record's thumbnail.
    ///
    /// This is the cached artifact when it is fresh, the original file when the
    /// media is already no taller than [`THUMBNAIL_HEIGHT`], and a newly
    /// generated artifact otherwise.
    pub async fn get_thumbnail(&self, record: &MediaRecord) -> Result<PathBuf> {
        let kind = record.kind();
        let artifact = self.cache.artifact_path(record.id, kind);

        if self.cache.is_fresh(&artifact, record.last_modified)? {
            return Ok(artifact);
        }

        // Don't make a thumbnail if it's smaller than what we're going to make anyway
        if record.height <= THUMBNAIL_HEIGHT {
            return Ok(record.path.clone());
        }
        if record.width == 0 {
            return Err(Error::InvalidDimensions {
                path: record.path.clone(),
                width: record.width,
                height: record.height,
            });
        }

        let slot = self.acquire(record.id);
        let _guard = slot.lock.lock().await;

        // Someone else may have regenerated it while we waited
        if self.cache.is_fresh(&artifact, record.last_modified)? {
            return Ok(artifact);
        }

        self.generate(record, kind, &artifact).await?;
        Ok(artifact)
    }

    async fn generate(&self, record: &MediaRecord, kind: MediaKind, artifact: &Path) -> Result<()> {
        let (width, height) = target_dimensions(record.width, record.height, THUMBNAIL_HEIGHT);
        let temp = self.cache.temp_file(artifact)?;
        let source = record.path.clone();
        let output = temp.path().to_path_buf();

        tracing::debug!(
            id = record.id,
            path = %record.path.display(),
            ?kind,
            width,
            height,
            "Generating thumbnail"
        );

        match kind {
            MediaKind::Video => {
                self.tools.extract_frame(&source, &output, width, height).await?;
            }
            #[cfg(feature = "animated-thumbnails")]
            MediaKind::Animated => {
                tokio::task::spawn_blocking(move || halve_animation(&source, &output)).await??;
            }
            _ => {
                tokio::task::spawn_blocking(move || resize_image(&source, &output, width, height)).await??;
            }
        }

        self.cache.commit(temp, artifact, record.last_modified)?;
        tracing::info!(id = record.id, artifact = %artifact.display(), "Thumbnail written");

        Ok(())
    }

    fn acquire(&self, id: i64) -> InFlight<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = in_flight.entry(id).or_default().clone();
        InFlight {
            registry: &self.in_flight,
            id,
            lock,
        }
    }
}

/// A claim on one record's generation lock; the registry entry goes away
/// with the last claim.
struct InFlight<'a> {
    registry: &'a Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    id: i64,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // Give up our reference while holding the registry, so the last
        // claim to leave always sees only the map's copy
        drop(std::mem::take(&mut self.lock));
        if registry.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            registry.remove(&self.id);
        }
    }
}

fn resize_image(source: &Path, output: &Path, width: u32, height: u32) -> Result<()> {
    let img = ImageReader::open(source)
        .map_err(|e| Error::io(source, e))?
        .with_guessed_format()
        .map_err(|e| Error::io(source, e))?
        .decode()
        .map_err(|e| Error::Decode {
            path: source.to_path_buf(),
            source: e,
        })?;

    let thumbnail = match img.resize_exact(width, height, FilterType::Lanczos3) {
        // PNG has no float pixels
        thumb @ (DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)) => {
            DynamicImage::ImageRgba16(thumb.to_rgba16())
        }
        thumb => thumb,
    };

    thumbnail
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| Error::Thumbnail {
            path: source.to_path_buf(),
            source: e,
        })
}

/// Halve every frame of a GIF, keeping timing and looping forever.
#[cfg(feature = "animated-thumbnails")]
fn halve_animation(source: &Path, output: &Path) -> Result<()> {
    use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
    use image::{imageops, AnimationDecoder, Frame};
    use std::fs::File;
    use std::io::{BufReader, BufWriter};

    let decode_err = |e| Error::Decode {
        path: source.to_path_buf(),
        source: e,
    };
    let encode_err = |e| Error::Thumbnail {
        path: source.to_path_buf(),
        source: e,
    };

    let file = File::open(source).map_err(|e| Error::io(source, e))?;
    let frames = GifDecoder::new(BufReader::new(file))
        .map_err(decode_err)?
        .into_frames()
        .collect_frames()
        .map_err(decode_err)?;

    let out = File::create(output).map_err(|e| Error::io(output, e))?;
    let mut encoder = GifEncoder::new(BufWriter::new(out));
    encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?;

    for frame in frames {
        let (left, top, delay) = (frame.left(), frame.top(), frame.delay());
        let buffer = frame.into_buffer();
        let width = (buffer.width() / 2).max(1);
        let height = (buffer.height() / 2).max(1);
        let halved = imageops::resize(&buffer, width, height, FilterType::Triangle);
        encoder
            .encode_frame(Frame::from_parts(halved, left / 2, top / 2, delay))
            .map_err(encode_err)?;
    }

    Ok(())
}
