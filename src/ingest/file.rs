//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file or a `stub://` synthetic
//! stream. The file source is responsible for:
//! - Refusing remote URLs (uploads are written to a local temp file first)
//! - Decoding video frames in-memory
//! - Reporting end of file as `Ok(None)`

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::{FrameRate, FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "/srv/videos/animal3.mp4") or `stub://...`.
    pub path: String,
    /// Playback pacing. Synthetic streams are never paced.
    pub rate: FrameRate,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            let synthetic = SyntheticConfig::parse(&config.path)?;
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(synthetic, "FileSource")),
            });
        }
        if !Path::new(&config.path).is_file() {
            return Err(anyhow!("video file '{}' does not exist", config.path));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "file ingestion requires the ingest-file-ffmpeg feature"
            ))
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Minimum gap between two decoded frames, `None` when unpaced.
///
/// `native_fps` is the stream's own average rate, when the container reports
/// a usable one.
#[cfg_attr(not(feature = "ingest-file-ffmpeg"), allow(dead_code))]
pub(crate) fn frame_interval(rate: FrameRate, native_fps: Option<f64>) -> Option<Duration> {
    let fps = match rate {
        FrameRate::Unpaced => return None,
        FrameRate::Fixed(fps) => f64::from(fps),
        FrameRate::Native => native_fps?,
    };
    (fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        let err = FileSource::new(FileConfig {
            path: "https://example.com/clip.mp4".to_string(),
            rate: FrameRate::Native,
        })
        .err()
        .expect("remote url must be rejected");
        assert!(err.to_string().contains("local paths"));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = FileSource::new(FileConfig {
            path: "/nonexistent/animal3.mp4".to_string(),
            rate: FrameRate::Native,
        })
        .err()
        .expect("missing file must be rejected");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn native_rate_follows_the_stream() {
        assert_eq!(
            frame_interval(FrameRate::Native, Some(25.0)),
            Some(Duration::from_millis(40))
        );
        assert_eq!(
            frame_interval(FrameRate::Fixed(10), Some(25.0)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(frame_interval(FrameRate::Unpaced, Some(25.0)), None);
        // Containers without a usable rate play unpaced.
        assert_eq!(frame_interval(FrameRate::Native, None), None);
        assert_eq!(frame_interval(FrameRate::Native, Some(f64::NAN)), None);
        assert_eq!(frame_interval(FrameRate::Native, Some(0.0)), None);
    }

    #[test]
    fn stub_path_reports_stats() -> Result<()> {
        let mut source = FileSource::new(FileConfig {
            path: "stub://clip?frames=2&width=16&height=16".to_string(),
            rate: FrameRate::Native,
        })?;
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().source, "stub://clip");
        assert!(source.is_healthy());
        Ok(())
    }
}
