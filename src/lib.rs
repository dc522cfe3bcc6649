//! Media catalog: walks a folder tree, records every image and video it
//! finds in SQLite and serves fixed-height thumbnails from a disk cache.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod utils;

pub use commands::{
    walk, CacheStats, IngestReport, ScanOptions, Scanner, ThumbnailCache, Thumbnailer, THUMBNAIL_HEIGHT,
};
pub use config::{Config, ErrorPolicy};
pub use db::{Catalog, SqliteCatalog};
pub use error::{Error, Result};
pub use models::{MediaKind, MediaRecord, NewMedia};
pub use utils::{Detection, FfmpegTools};
