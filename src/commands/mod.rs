pub mod cache;
pub mod metadata;
pub mod scanner;
pub mod thumbnail;

pub use cache::{CacheStats, ThumbnailCache};
pub use metadata::{extract, ExtractedMedia};
pub use scanner::{walk, IngestReport, ScanOptions, Scanner};
pub use thumbnail::{Thumbnailer, THUMBNAIL_HEIGHT};
