use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};

use super::backend::{DetectionCapability, DetectorBackend};
use super::backends::ScriptedBackend;
use crate::config::{FeedingSettings, IntruderSettings};

/// Registry of detector backends available to a binary.
///
/// The monitors own their backend outright, so selection consumes the
/// registry and hands back the chosen backend.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Take a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability, then
    /// falls back to the first supporting backend by name.
    pub fn into_backend_for(
        mut self,
        capability: DetectionCapability,
    ) -> Result<Box<dyn DetectorBackend>> {
        if let Some(default_name) = self.default_name.clone() {
            let supports = self
                .backends
                .get(&default_name)
                .is_some_and(|backend| backend.supports(capability));
            if supports {
                if let Some(backend) = self.backends.remove(&default_name) {
                    return Ok(backend);
                }
            }
        }

        for name in self.list() {
            let supports = self
                .backends
                .get(&name)
                .is_some_and(|backend| backend.supports(capability));
            if supports {
                if let Some(backend) = self.backends.remove(&name) {
                    return Ok(backend);
                }
            }
        }

        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }
}

/// Classifier for the feeding monitor.
///
/// A model (with the `backend-tract` feature) takes precedence over a
/// detector script when both are configured.
pub fn open_classifier(settings: &FeedingSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut registry = BackendRegistry::new();
    if let Some(path) = &settings.script_path {
        registry.register(ScriptedBackend::from_json_file(path)?);
    }
    if let Some(path) = &settings.model_path {
        #[cfg(feature = "backend-tract")]
        {
            registry.register(super::backends::TractClassifier::new(
                path,
                settings.input_width,
                settings.input_height,
                settings.layout,
            )?);
            registry.set_default("tract")?;
        }
        #[cfg(not(feature = "backend-tract"))]
        log::warn!(
            "ignoring model {}: built without the backend-tract feature",
            path.display()
        );
    }
    registry
        .into_backend_for(DetectionCapability::Classification)
        .context("no classifier configured (set a model path or a detector script)")
}

/// Object detector for the intruder monitor.
pub fn open_object_detector(settings: &IntruderSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut registry = BackendRegistry::new();
    if let Some(path) = &settings.script_path {
        registry.register(ScriptedBackend::from_json_file(path)?);
    }
    if let Some(path) = &settings.model_path {
        #[cfg(feature = "backend-tract")]
        {
            registry.register(
                super::backends::TractObjectDetector::new(path, settings.input_size)?
                    .with_iou_threshold(settings.iou_threshold),
            );
            registry.set_default("tract-yolo")?;
        }
        #[cfg(not(feature = "backend-tract"))]
        log::warn!(
            "ignoring model {}: built without the backend-tract feature",
            path.display()
        );
    }
    registry
        .into_backend_for(DetectionCapability::ObjectDetection)
        .context("no object detector configured (set a model path or a detector script)")
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::Classification;

    #[test]
    fn default_backend_is_preferred_when_capable() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::classifier(vec![]));
        let backend = registry.into_backend_for(DetectionCapability::Classification)?;
        assert_eq!(backend.name(), "scripted");
        Ok(())
    }

    #[test]
    fn missing_capability_is_an_error() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::classifier(vec![Some(Classification {
            label_index: 0,
            confidence: 0.99,
        })]));
        let err = registry
            .into_backend_for(DetectionCapability::ObjectDetection)
            .err()
            .expect("scripted classifier cannot detect objects");
        assert!(err.to_string().contains("ObjectDetection"));
    }

    #[test]
    fn open_classifier_requires_a_backend() {
        let cfg = crate::config::MonitorConfig::defaults().unwrap();
        let err = open_classifier(&cfg.feeding).err().expect("nothing configured");
        assert!(err.to_string().contains("no classifier configured"));
    }

    #[test]
    fn open_object_detector_uses_script() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, br#"{"detections": [[]]}"#)?;
        let mut cfg = crate::config::MonitorConfig::defaults()?;
        cfg.intruder.script_path = Some(file.path().to_path_buf());
        let backend = open_object_detector(&cfg.intruder)?;
        assert_eq!(backend.name(), "scripted");
        Ok(())
    }

    #[test]
    fn set_default_rejects_unknown_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::classifier(vec![]));
        let err = registry.set_default("tract").unwrap_err();
        assert!(err.to_string().contains("scripted"));
    }
}
