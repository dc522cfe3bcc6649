use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};

/// Handles to the external `ffprobe`/`ffmpeg` binaries.
///
/// The binaries are only resolved when first spawned, so a library of
/// stills never needs ffmpeg installed.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// ffprobe reports container numbers as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeFormat {
    pub size: Option<String>,
    pub duration: Option<String>,
}

impl ProbeOutput {
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video") && s.width.is_some() && s.height.is_some())
    }

    pub fn container_size(&self) -> Option<u64> {
        self.format.as_ref()?.size.as_deref()?.trim().parse().ok()
    }

    pub fn duration(&self) -> Option<f64> {
        self.format
            .as_ref()?
            .duration
            .as_deref()?
            .trim()
            .parse()
            .ok()
            .filter(|d: &f64| d.is_finite())
    }
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.ffmpeg_path, &config.ffprobe_path, config.tool_timeout())
    }

    /// Read container and stream metadata for a video.
    pub async fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);

        let output = self.run(command, &self.ffprobe, path).await?;
        if !output.status.success() {
            return Err(Error::Probe {
                path: path.to_path_buf(),
                reason: stderr_reason(&output),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| Error::Probe {
            path: path.to_path_buf(),
            reason: format!("unreadable ffprobe output: {e}"),
        })
    }

    /// Grab the frame at 0s, scaled to exactly `width`x`height`, into `output`.
    pub async fn extract_frame(&self, source: &Path, output: &Path, width: u32, height: u32) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-ss", "0", "-i"])
            .arg(source)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={width}:{height}"))
            .args(["-f", "image2", "-c:v", "png", "-y"])
            .arg(output);

        let result = self.run(command, &self.ffmpeg, source).await?;
        if !result.status.success() {
            return Err(Error::FrameExtraction {
                path: source.to_path_buf(),
                reason: stderr_reason(&result),
            });
        }
        // ffmpeg exits cleanly without writing anything when there is no frame at 0s
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(Error::FrameExtraction {
                path: source.to_path_buf(),
                reason: "ffmpeg produced no frame".to_string(),
            }),
        }
    }

    async fn run(&self, mut command: Command, tool: &Path, subject: &Path) -> Result<Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let tool_name = tool
            .file_name()
            .unwrap_or(OsStr::new("ffmpeg"))
            .to_string_lossy()
            .into_owned();

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolMissing { tool: tool_name.clone() }
            } else {
                Error::io(tool, e)
            }
        })?;

        // Dropping the future on timeout drops the child, which kills it
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| Error::io(tool, e)),
            Err(_) => {
                tracing::warn!(tool = %tool_name, path = %subject.display(), "External tool timed out; killed");
                Err(Error::ToolTimeout {
                    tool: tool_name,
                    path: subject.to_path_buf(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn stderr_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr.to_string()
    }
}
