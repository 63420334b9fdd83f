mod backend;
pub mod backends;
pub mod labels;
mod registry;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::{ScriptedBackend, TensorLayout};
pub use labels::{Category, LabelMap};
pub use registry::{open_classifier, open_object_detector, BackendRegistry};
pub use result::{non_max_suppression, BoundingBox, Classification, PixelRect};
