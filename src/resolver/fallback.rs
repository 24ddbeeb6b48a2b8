use std::path::PathBuf;

use super::{ResourceResolver, Source, file_uri_to_path, is_absolute_uri, resolve_against};
use crate::error::Result;

/// Last link of the chain: local files only.
///
/// Handles absolute paths, `file:` URIs, and references relative to a base
/// that is itself a path or `file:` URI. Other schemes are declined.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackResolver;

impl FallbackResolver {
    fn local_path(reference: &str, base: Option<&str>) -> Option<PathBuf> {
        if reference.starts_with("file:") {
            return file_uri_to_path(reference);
        }
        if is_absolute_uri(reference) {
            return None;
        }

        match base {
            Some(base) if base.starts_with("file:") => {
                let base_path = file_uri_to_path(base)?;
                let base_path = base_path.to_string_lossy();
                Some(PathBuf::from(resolve_against(reference, Some(&base_path))))
            }
            Some(base) if is_absolute_uri(base) => None,
            _ => Some(PathBuf::from(resolve_against(reference, base))),
        }
    }
}

impl ResourceResolver for FallbackResolver {
    fn resolve(&self, reference: &str, base: Option<&str>) -> Result<Option<Source>> {
        let Some(path) = Self::local_path(reference, base) else {
            return Ok(None);
        };
        if path.is_file() {
            Ok(Some(Source::from_file(path)))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
