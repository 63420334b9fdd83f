pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;
#[cfg(feature = "backend-tract")]
pub mod tract_detect;

use anyhow::anyhow;

pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;
#[cfg(feature = "backend-tract")]
pub use tract_detect::TractObjectDetector;

/// Memory layout of a model's image input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, H, W]` (PyTorch exports).
    #[default]
    Nchw,
    /// `[1, H, W, 3]` (Keras / Teachable Machine exports).
    Nhwc,
}

impl std::str::FromStr for TensorLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "nchw" => Ok(Self::Nchw),
            "nhwc" => Ok(Self::Nhwc),
            other => Err(anyhow!(
                "unknown tensor layout '{}': expected nchw or nhwc",
                other
            )),
        }
    }
}
