use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog entry per distinct source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mimetype: String,
    pub size: u64,
    pub checksum: String,
    pub last_modified: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mimetype)
    }
}

/// The fields of a record before the catalog assigns it an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMedia {
    pub path: PathBuf,
    pub name: String,
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mimetype: String,
    pub size: u64,
    pub checksum: String,
    pub last_modified: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Animated,
    Unknown,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        match mime.split_once('/') {
            Some(("image", "gif")) => MediaKind::Animated,
            Some(("image", _)) => MediaKind::Image,
            Some(("video", _)) => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }

    pub fn is_media(self) -> bool {
        self != MediaKind::Unknown
    }
}
