//! Synthetic `stub://` frame source.
//!
//! Identifiers look like `stub://name?frames=10&scene=dark&width=320&height=240`.
//! Without `frames` the source never ends.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::SourceStats;
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// What the synthetic frames look like.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyntheticScene {
    /// Shifting gradient, changes every 50 frames.
    #[default]
    Pattern,
    /// Uniform light grey, inside the light/white colour range.
    Light,
    /// Uniform near-black.
    Dark,
}

impl std::str::FromStr for SyntheticScene {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pattern" => Ok(Self::Pattern),
            "light" | "white" => Ok(Self::Light),
            "dark" | "black" => Ok(Self::Dark),
            other => Err(anyhow!(
                "unknown synthetic scene '{}': expected pattern, light or dark",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub scene: SyntheticScene,
}

impl SyntheticConfig {
    pub fn parse(identifier: &str) -> Result<Self> {
        let url = Url::parse(identifier)
            .with_context(|| format!("invalid synthetic source '{}'", identifier))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic sources use the stub:// scheme"));
        }
        let mut config = Self {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            frames: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            scene: SyntheticScene::default(),
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    config.frames = Some(value.parse().map_err(|_| {
                        anyhow!("stub frames must be an integer, got '{}'", value)
                    })?)
                }
                "width" => config.width = parse_dimension("width", &value)?,
                "height" => config.height = parse_dimension("height", &value)?,
                "scene" => config.scene = value.parse()?,
                other => log::warn!("ignoring unknown stub parameter '{}'", other),
            }
        }
        Ok(config)
    }
}

fn parse_dimension(name: &str, value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(anyhow!("stub {} must be a positive integer, got '{}'", name, value)),
    }
}

pub(crate) struct SyntheticSource {
    config: SyntheticConfig,
    label: String,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub(crate) fn new(config: SyntheticConfig, label: &str) -> Self {
        Self {
            config,
            label: label.to_string(),
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "{}: connected to stub://{} (synthetic, {}x{}, {:?})",
            self.label,
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.scene
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let index = self.frame_count;
        self.frame_count += 1;

        let frame = match self.config.scene {
            SyntheticScene::Light => {
                Frame::solid(self.config.width, self.config.height, [220, 220, 220], index)
            }
            SyntheticScene::Dark => {
                Frame::solid(self.config.width, self.config.height, [20, 20, 20], index)
            }
            SyntheticScene::Pattern => {
                let pixels = self.generate_pattern();
                Frame::from_rgb(pixels, self.config.width, self.config.height, index)?
            }
        };
        Ok(Some(frame))
    }

    fn generate_pattern(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.config.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_identifier() {
        let cfg = SyntheticConfig::parse("stub://gate?frames=12&scene=dark&width=64&height=48")
            .unwrap();
        assert_eq!(cfg.name, "gate");
        assert_eq!(cfg.frames, Some(12));
        assert_eq!(cfg.scene, SyntheticScene::Dark);
        assert_eq!((cfg.width, cfg.height), (64, 48));
    }

    #[test]
    fn parse_rejects_zero_width() {
        let err = SyntheticConfig::parse("stub://gate?width=0").unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn unbounded_source_keeps_producing() -> Result<()> {
        let cfg = SyntheticConfig::parse("stub://pen?width=8&height=8")?;
        let mut source = SyntheticSource::new(cfg, "test");
        for expected in 0..100 {
            let frame = source.next_frame()?.expect("frame");
            assert_eq!(frame.index, expected);
        }
        Ok(())
    }
}
