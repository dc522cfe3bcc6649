pub mod media;

pub use media::{MediaKind, MediaRecord, NewMedia};
