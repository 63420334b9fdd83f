//! Classifier label files and the categories they map to.
//!
//! A label file has one label per line; the line number is the model's output
//! index. Exported label files often prefix each line with its index
//! (`0 feeding`), which is stripped before the name is matched.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// What a classifier label means to the feeding monitor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Feeding,
    Petting,
    /// Nothing of interest in the frame.
    Idle,
    /// A label the monitor does not know about.
    Other(String),
}

impl Category {
    /// Map a bare label name (index already stripped) to a category.
    pub fn from_label(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "feeding" => Self::Feeding,
            "petting" => Self::Petting,
            "none" | "idle" | "background" => Self::Idle,
            _ => Self::Other(name.trim().to_string()),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feeding => write!(f, "feeding"),
            Self::Petting => write!(f, "petting"),
            Self::Idle => write!(f, "none"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Label index → (raw label, category).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<(String, Category)>,
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let map = Self::parse(&raw);
        if map.is_empty() {
            return Err(anyhow!("label file {} has no labels", path.display()));
        }
        Ok(map)
    }

    pub fn parse(raw: &str) -> Self {
        let labels = raw
            .lines()
            .map(|line| {
                let line = line.trim();
                let category = Category::from_label(strip_index(line));
                (line.to_string(), category)
            })
            .collect();
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Raw label text, as written in the file.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|(label, _)| label.as_str())
    }

    pub fn category(&self, index: usize) -> Option<&Category> {
        self.labels.get(index).map(|(_, category)| category)
    }
}

fn strip_index(line: &str) -> &str {
    match line.split_once(char::is_whitespace) {
        Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_digit()) => rest.trim(),
        _ => line,
    }
}
