//! Frame ingestion sources.
//!
//! This module provides different sources for decoded frames:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//! - Synthetic `stub://` sources (testing, offline demos)
//!
//! Every source implements [`FrameSource`]. End of stream is `Ok(None)`, not an
//! error; a source that cannot be opened fails in `new` or `connect`, before
//! the monitor loop starts.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod synthetic;
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use synthetic::{SyntheticConfig, SyntheticScene};
pub use v4l2::{V4l2Config, V4l2Source};

/// A source of decoded frames.
pub trait FrameSource {
    /// Open the underlying file or device.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Whether the source is still producing frames on schedule.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Frame counters for health logging.
    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for any frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Where frames come from, as chosen by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local video file path, or a `stub://` synthetic source.
    File(String),
    /// Camera device index (`0` is `/dev/video0`).
    Device(u32),
}

impl SourceSpec {
    /// Parse a user-supplied identifier.
    ///
    /// A bare integer selects a camera device, `webcam` selects device 0, and
    /// anything else is treated as a file path.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("source identifier must not be empty"));
        }
        if value.eq_ignore_ascii_case("webcam") {
            return Ok(Self::Device(0));
        }
        if let Ok(index) = value.parse::<u32>() {
            return Ok(Self::Device(index));
        }
        Ok(Self::File(value.to_string()))
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path),
            Self::Device(index) => write!(f, "device {}", index),
        }
    }
}

/// How fast a source hands out frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameRate {
    /// Files play at their own frame rate; cameras keep the device default.
    #[default]
    Native,
    /// A fixed number of frames per second.
    Fixed(u32),
    /// Files decode as fast as possible.
    Unpaced,
}

impl FrameRate {
    /// Rate requested from a camera driver, 0 for the device default.
    pub fn device_fps(self) -> u32 {
        match self {
            Self::Fixed(fps) => fps,
            Self::Native | Self::Unpaced => 0,
        }
    }
}

impl std::str::FromStr for FrameRate {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("native") {
            return Ok(Self::Native);
        }
        if value.eq_ignore_ascii_case("unpaced") {
            return Ok(Self::Unpaced);
        }
        match value.parse::<u32>() {
            Ok(fps) if fps > 0 => Ok(Self::Fixed(fps)),
            _ => Err(anyhow!(
                "frame rate must be 'native', 'unpaced' or a positive fps, got '{}'",
                value
            )),
        }
    }
}

/// Open (construct and connect) the source named by `spec`.
pub fn open_source(spec: &SourceSpec, rate: FrameRate) -> Result<Box<dyn FrameSource + Send>> {
    let mut source: Box<dyn FrameSource + Send> = match spec {
        SourceSpec::File(path) => Box::new(FileSource::new(FileConfig {
            path: path.clone(),
            rate,
        })?),
        SourceSpec::Device(index) => Box::new(V4l2Source::new(V4l2Config {
            device: format!("/dev/video{}", index),
            target_fps: rate.device_fps(),
            ..V4l2Config::default()
        })?),
    };
    source.connect()?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_spec_variants() {
        assert_eq!(SourceSpec::parse("webcam").unwrap(), SourceSpec::Device(0));
        assert_eq!(SourceSpec::parse(" 2 ").unwrap(), SourceSpec::Device(2));
        assert_eq!(
            SourceSpec::parse("animal3.mp4").unwrap(),
            SourceSpec::File("animal3.mp4".to_string())
        );
        assert!(SourceSpec::parse("  ").is_err());
    }

    #[test]
    fn parse_frame_rate() {
        assert_eq!("native".parse::<FrameRate>().unwrap(), FrameRate::Native);
        assert_eq!(" Unpaced ".parse::<FrameRate>().unwrap(), FrameRate::Unpaced);
        assert_eq!("25".parse::<FrameRate>().unwrap(), FrameRate::Fixed(25));
        assert!("0".parse::<FrameRate>().is_err());
        assert!("fast".parse::<FrameRate>().is_err());
        assert_eq!(FrameRate::Fixed(15).device_fps(), 15);
        assert_eq!(FrameRate::Native.device_fps(), 0);
    }

    #[test]
    fn open_stub_source_yields_frames_until_exhausted() -> Result<()> {
        let spec = SourceSpec::parse("stub://pen?frames=3")?;
        let mut source = open_source(&spec, FrameRate::Native)?;

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame()? {
            seen.push(frame.index);
        }

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }
}
