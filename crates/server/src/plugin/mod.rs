//! Source plugins.
//!
//! A plugin turns a non-image source (a PDF, a video) into a raster image the
//! backend can work on. Plugins are registered by mime type at startup and
//! may claim operation letters the core grammar leaves free.

pub mod pdf;

pub use pdf::PdfPlugin;

use crate::backend::BackendResult;
use pigment_core::{Operation, Transformations};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;

/// How a plugin is matched against a source mime type.
#[derive(Debug, Clone)]
pub enum MimeMatcher {
    Exact(String),
    Pattern(Regex),
}

impl MimeMatcher {
    pub fn exact(mime: impl Into<String>) -> Self {
        Self::Exact(mime.into())
    }

    pub fn matches(&self, mime: &str) -> bool {
        match self {
            Self::Exact(expected) => expected.eq_ignore_ascii_case(mime),
            Self::Pattern(re) => re.is_match(mime),
        }
    }
}

pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn mime_types(&self) -> Vec<MimeMatcher>;

    /// Operations the plugin adds to the grammar, as `(name, letter)`.
    fn operations(&self) -> &'static [(&'static str, char)];

    /// Render `source` to a raster file. `plugin_ops` holds the operations
    /// carrying this plugin's letters; `all` is the full decoded list.
    fn transform(
        &self,
        source: &Path,
        plugin_ops: &[Operation],
        all: &Transformations,
    ) -> BackendResult<TempPath>;

    fn letters(&self) -> Vec<char> {
        self.operations().iter().map(|(_, letter)| *letter).collect()
    }

    /// The subset of `all` addressed to this plugin.
    fn extract(&self, all: &Transformations) -> Vec<Operation> {
        let letters = self.letters();
        all.iter()
            .filter(|op| matches!(op, Operation::Extension { letter, .. } if letters.contains(letter)))
            .cloned()
            .collect()
    }
}

/// Plugins by mime matcher, first registration wins.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    entries: Vec<(MimeMatcher, Arc<dyn Plugin>)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured plugin names.
    pub fn from_names(names: &[String]) -> Result<Self, String> {
        let mut registry = Self::new();
        for name in names {
            match name.as_str() {
                "pdf" => registry.register(Arc::new(PdfPlugin::new())),
                other => return Err(format!("unknown plugin: {other}")),
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        for matcher in plugin.mime_types() {
            self.entries.push((matcher, plugin.clone()));
        }
    }

    pub fn find(&self, mime: &str) -> Option<Arc<dyn Plugin>> {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(mime))
            .map(|(_, plugin)| plugin.clone())
    }

    /// Every letter claimed by a registered plugin.
    pub fn letters(&self) -> Vec<char> {
        let mut letters: Vec<char> = self
            .entries
            .iter()
            .flat_map(|(_, plugin)| plugin.letters())
            .collect();
        letters.sort_unstable();
        letters.dedup();
        letters
    }

    pub fn letter_for_name(&self, name: &str) -> Option<char> {
        self.entries.iter().find_map(|(_, plugin)| {
            plugin
                .operations()
                .iter()
                .find(|(op, _)| *op == name)
                .map(|(_, letter)| *letter)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
