//! Resource resolution chain.
//!
//! Every logical reference the pipeline follows (meta-transform stylesheets,
//! imported specifications, schema files, copy dependencies) goes through
//! [`ResolverChain::resolve`]. Resolvers are tried in a fixed order and the
//! first one that produces a [`Source`] wins:
//!
//! 1. [`EmbeddedResolver`] for the reserved `cp:/` scheme
//! 2. [`CatalogResolver`] for catalog-mapped references
//! 3. [`FallbackResolver`] for plain files and `file:` URIs

mod catalog;
mod embedded;
mod fallback;

pub use catalog::{Catalog, CatalogEntry, CatalogResolver, generate_catalog};
pub use embedded::{EMBEDDED_SCHEME, EmbeddedResolver};
pub use fallback::FallbackResolver;

use std::fmt::Debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::error::{Result, RunnerError};

/// Cached regex recognising an absolute URI (`scheme:...`)
static ABSOLUTE_URI_REGEX: OnceLock<Regex> = OnceLock::new();

/// Get or initialize the absolute URI regex.
///
/// Schemes need at least two characters so Windows drive letters stay paths.
fn get_absolute_uri_regex() -> &'static Regex {
    ABSOLUTE_URI_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]+:").expect("Failed to compile absolute URI regex")
    })
}

/// Where a resolved source's bytes live
#[derive(Debug, Clone)]
enum Backing {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

/// A resolved, readable resource with an absolute identifier
#[derive(Debug, Clone)]
pub struct Source {
    system_id: String,
    backing: Backing,
}

impl Source {
    /// A source backed by a file; the identifier is the file's absolute path
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = absolute_path(path.as_ref());
        Self {
            system_id: path.to_string_lossy().into_owned(),
            backing: Backing::File(path),
        }
    }

    pub fn from_bytes(system_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            system_id: system_id.into(),
            backing: Backing::Memory(Arc::from(data)),
        }
    }

    pub fn from_shared(system_id: impl Into<String>, data: Arc<[u8]>) -> Self {
        Self {
            system_id: system_id.into(),
            backing: Backing::Memory(data),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// The backing file, when this source lives on disk
    pub fn file_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path),
            Backing::Memory(_) => None,
        }
    }

    /// Open a buffered reader over the source's bytes
    pub fn open(&self) -> Result<Box<dyn BufRead + '_>> {
        match &self.backing {
            Backing::File(path) => {
                let file = File::open(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => RunnerError::ResourceNotFound {
                        reference: path.display().to_string(),
                        base: None,
                    },
                    _ => RunnerError::Io(e),
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            Backing::Memory(data) => Ok(Box::new(Cursor::new(data.as_ref()))),
        }
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match &self.backing {
            Backing::File(path) => Ok(std::fs::read(path)?),
            Backing::Memory(data) => Ok(data.to_vec()),
        }
    }
}

/// One link of the resolution chain
pub trait ResourceResolver: Send + Sync + Debug {
    /// Resolve `reference` against `base`.
    ///
    /// `Ok(None)` means this resolver does not know the reference and the
    /// next one should be tried.
    fn resolve(&self, reference: &str, base: Option<&str>) -> Result<Option<Source>>;

    /// Returns a human-readable name for this resolver (for logging)
    fn name(&self) -> &'static str;

    /// Resolve or fail with `ResourceNotFound`
    fn require(&self, reference: &str, base: Option<&str>) -> Result<Source> {
        self.resolve(reference, base)?
            .ok_or_else(|| RunnerError::ResourceNotFound {
                reference: reference.to_string(),
                base: base.map(str::to_string),
            })
    }
}

/// Embedded, then catalog, then fallback
#[derive(Debug)]
pub struct ResolverChain {
    embedded: Arc<EmbeddedResolver>,
    catalog: CatalogResolver,
    fallback: FallbackResolver,
}

impl ResolverChain {
    pub fn new(embedded: Arc<EmbeddedResolver>, catalog: CatalogResolver) -> Self {
        Self {
            embedded,
            catalog,
            fallback: FallbackResolver,
        }
    }

    /// A chain with only embedded and fallback resolution
    pub fn without_catalog(embedded: EmbeddedResolver) -> Self {
        let embedded = Arc::new(embedded);
        let catalog = CatalogResolver::empty(Arc::clone(&embedded));
        Self::new(embedded, catalog)
    }

    pub fn embedded(&self) -> &EmbeddedResolver {
        &self.embedded
    }

    pub fn catalog(&self) -> &CatalogResolver {
        &self.catalog
    }

    fn links(&self) -> [&dyn ResourceResolver; 3] {
        [self.embedded.as_ref(), &self.catalog, &self.fallback]
    }
}

impl ResourceResolver for ResolverChain {
    fn resolve(&self, reference: &str, base: Option<&str>) -> Result<Option<Source>> {
        for resolver in self.links() {
            if let Some(source) = resolver.resolve(reference, base)? {
                log::debug!(
                    "Resolved '{}' via {} resolver to {}",
                    reference,
                    resolver.name(),
                    source.system_id()
                );
                return Ok(Some(source));
            }
        }
        log::debug!(
            "No resolver produced a source for '{}' (base: {:?})",
            reference,
            base
        );
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

/// Whether `reference` carries a URI scheme
pub fn is_absolute_uri(reference: &str) -> bool {
    get_absolute_uri_regex().is_match(reference)
}

/// Whether `reference` can be resolved without a base
pub fn is_absolute_reference(reference: &str) -> bool {
    is_absolute_uri(reference) || Path::new(reference).is_absolute()
}

/// Resolve a relative reference against a base identifier.
///
/// Works on `/`-separated identifiers of any scheme (`cp:/`, `file:`) and on
/// plain filesystem paths. Dot segments are removed lexically.
pub fn resolve_against(reference: &str, base: Option<&str>) -> String {
    if is_absolute_reference(reference) {
        return reference.to_string();
    }
    let Some(base) = base else {
        return reference.to_string();
    };

    let directory = match base.rfind('/') {
        Some(index) => &base[..=index],
        None => "",
    };
    normalize_segments(&format!("{}{}", directory, reference))
}

/// Remove `.` and `..` segments from a `/`-separated identifier, keeping any
/// `scheme:` prefix and leading slashes intact
fn normalize_segments(identifier: &str) -> String {
    let (prefix, rest) = match get_absolute_uri_regex().find(identifier) {
        Some(m) => identifier.split_at(m.end()),
        None => ("", identifier),
    };
    let leading = rest.len() - rest.trim_start_matches('/').len();
    let trailing_slash = rest.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.trim_start_matches('/').split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if leading == 0 {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let mut normalized = format!("{}{}{}", prefix, "/".repeat(leading), segments.join("/"));
    if trailing_slash && !segments.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Convert a `file:` URI to a path, decoding `%XX` escapes
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file:")?;
    let rest = match rest.strip_prefix("//") {
        // file://host/path: only the empty and localhost hosts are local
        Some(authority_and_path) => {
            let slash = authority_and_path.find('/')?;
            let (host, path) = authority_and_path.split_at(slash);
            if !host.is_empty() && host != "localhost" {
                return None;
            }
            path
        }
        None => rest,
    };
    Some(PathBuf::from(percent_decode(rest)))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                decoded.push(value);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(decoded).unwrap_or_else(|e| {
        log::warn!(
            "Escapes in '{}' do not decode to UTF-8 ({}); invalid bytes were replaced",
            input,
            e.utf8_error()
        );
        String::from_utf8_lossy(e.as_bytes()).into_owned()
    })
}

/// Make `path` absolute against the current directory and drop dot components
pub fn absolute_path(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
