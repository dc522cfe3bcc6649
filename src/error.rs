use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{} is neither an image nor a video ({mimetype})", path.display())]
    Unsupported { path: PathBuf, mimetype: String },

    #[error("failed to probe video {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("{tool} not found; install ffmpeg to handle videos")]
    ToolMissing { tool: String },

    #[error("{tool} timed out after {}s on {}", timeout.as_secs(), path.display())]
    ToolTimeout {
        tool: String,
        path: PathBuf,
        timeout: Duration,
    },

    #[error("failed to extract a frame from {}: {reason}", path.display())]
    FrameExtraction { path: PathBuf, reason: String },

    #[error("failed to write thumbnail for {}: {source}", path.display())]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{} has invalid dimensions {width}x{height}", path.display())]
    InvalidDimensions { path: PathBuf, width: u32, height: u32 },

    #[error("a media record already exists for {}", .0.display())]
    DuplicatePath(PathBuf),

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    /// An image (or animated image) could not be decoded, or decoded to nonsense.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// A video could not be probed, including a missing or hung `ffprobe`.
    pub fn is_probe(&self) -> bool {
        matches!(
            self,
            Error::Probe { .. } | Error::ToolMissing { .. } | Error::ToolTimeout { .. }
        )
    }
}
