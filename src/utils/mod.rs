pub mod exif;
pub mod ffmpeg;
pub mod hash;
pub mod sniff;

pub use exif::extract_date_taken;
pub use ffmpeg::FfmpegTools;
pub use hash::{hash_bytes, hash_file};
pub use sniff::{detect, Detection};
