//! Resolver for the reserved `cp:/` scheme.
//!
//! Embedded resources are looked up in an in-memory table first, then under
//! an optional resource root directory. A resource path never leaves the
//! root: absolute paths and `..` traversal are refused.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::{ResourceResolver, Source, resolve_against};
use crate::error::Result;

/// Scheme prefix for bundled resources
pub const EMBEDDED_SCHEME: &str = "cp:/";

#[derive(Debug, Default)]
pub struct EmbeddedResolver {
    resources: HashMap<String, Arc<[u8]>>,
    root: Option<PathBuf>,
    /// Canonicalized root for containment checks
    canonical_root: Option<PathBuf>,
}

impl EmbeddedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `cp:/` paths from files under `root`
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        self.canonical_root = root.canonicalize().ok();
        self.root = Some(root);
        self
    }

    /// Register an in-memory resource under `path` (without the scheme)
    pub fn with_resource(mut self, path: impl Into<String>, data: Vec<u8>) -> Self {
        self.add(path, data);
        self
    }

    pub fn add(&mut self, path: impl Into<String>, data: Vec<u8>) {
        let path = path.into();
        let key = path.trim_start_matches('/').to_string();
        self.resources.insert(key, Arc::from(data));
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.root.is_none()
    }

    /// Look up an absolute `cp:/` identifier
    pub fn lookup(&self, identifier: &str) -> Option<Source> {
        let path = identifier.strip_prefix(EMBEDDED_SCHEME)?.trim_start_matches('/');

        if let Some(data) = self.resources.get(path) {
            return Some(Source::from_shared(
                format!("{}{}", EMBEDDED_SCHEME, path),
                Arc::clone(data),
            ));
        }

        let file = self.path_under_root(path)?;
        if file.is_file() {
            Some(Source::from_file(file))
        } else {
            None
        }
    }

    /// Join `path` onto the resource root, refusing anything that escapes it
    fn path_under_root(&self, path: &str) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        if Path::new(path).is_absolute() {
            return None;
        }

        let full_path = root.join(path);
        if let (Ok(canonical), Some(base)) = (full_path.canonicalize(), &self.canonical_root) {
            if canonical.starts_with(base) {
                return Some(canonical);
            }
            log::warn!("Embedded resource '{}' escapes the resource root", path);
            return None;
        }

        if Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }
        Some(full_path)
    }
}

impl ResourceResolver for EmbeddedResolver {
    fn resolve(&self, reference: &str, base: Option<&str>) -> Result<Option<Source>> {
        let identifier = if reference.starts_with(EMBEDDED_SCHEME) {
            reference.to_string()
        } else if base.is_some_and(|b| b.starts_with(EMBEDDED_SCHEME)) {
            // Relative references inside embedded resources stay embedded
            resolve_against(reference, base)
        } else {
            return Ok(None);
        };

        if !identifier.starts_with(EMBEDDED_SCHEME) {
            return Ok(None);
        }
        Ok(self.lookup(&identifier))
    }

    fn name(&self) -> &'static str {
        "embedded"
    }
}
