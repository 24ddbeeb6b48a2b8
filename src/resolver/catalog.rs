//! OASIS XML catalog support.
//!
//! Understands `uri`, `system`, `rewriteURI`, `rewriteSystem` and
//! `nextCatalog` entries (optionally inside `group`), honours `xml:base`, and
//! can write a generated catalog that maps known resource locations and
//! chains to a user catalog.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    EMBEDDED_SCHEME, EmbeddedResolver, ResourceResolver, Source, absolute_path, file_uri_to_path,
    is_absolute_reference, is_absolute_uri, resolve_against,
};
use crate::error::{CatalogError, Result, RunnerError};
use crate::event::{Attribute, DocumentBuilder, EventSink, QName, attribute_value};
use crate::sax;
use crate::serialize;

pub const CATALOG_NAMESPACE: &str = "urn:oasis:names:tc:entity:xmlns:xml:catalog";

/// Chained catalogs deeper than this are ignored
const MAX_CATALOG_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    Uri { name: String, uri: String },
    System { system_id: String, uri: String },
    RewriteUri { start: String, prefix: String },
    RewriteSystem { start: String, prefix: String },
    NextCatalog { catalog: String },
}

/// A parsed catalog and the catalogs it chains to
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub system_id: String,
    pub entries: Vec<CatalogEntry>,
    pub next: Vec<Catalog>,
}

impl Catalog {
    /// Load a catalog file and every `nextCatalog` it reaches
    pub fn load(path: &Path) -> Result<Catalog> {
        let mut visited = HashSet::new();
        Self::load_chained(path, &mut visited, 0)
    }

    fn load_chained(path: &Path, visited: &mut HashSet<PathBuf>, depth: usize) -> Result<Catalog> {
        let path = absolute_path(path);
        let source = Source::from_file(&path);
        let entries = Self::parse(&source).map_err(|e| match e {
            RunnerError::Catalog(_) => e,
            other => CatalogError::Unreadable {
                path: path.clone(),
                details: other.to_string(),
            }
            .into(),
        })?;
        visited.insert(path.clone());

        let mut next = Vec::new();
        for entry in &entries {
            let CatalogEntry::NextCatalog { catalog } = entry else {
                continue;
            };
            let Some(next_path) = target_path(catalog) else {
                log::warn!("Skipping non-local chained catalog {}", catalog);
                continue;
            };
            let next_path = absolute_path(&next_path);
            if visited.contains(&next_path) {
                log::warn!("Catalog cycle through {} ignored", next_path.display());
                continue;
            }
            if depth + 1 >= MAX_CATALOG_DEPTH {
                log::warn!("Catalog chain too deep at {}", next_path.display());
                continue;
            }
            match Self::load_chained(&next_path, visited, depth + 1) {
                Ok(catalog) => next.push(catalog),
                // A broken chained catalog does not invalidate its parent
                Err(e) => log::warn!("{}", e),
            }
        }

        Ok(Catalog {
            system_id: source.system_id().to_string(),
            entries,
            next,
        })
    }

    /// Parse one catalog document; relative targets are made absolute
    pub fn parse(source: &Source) -> Result<Vec<CatalogEntry>> {
        let mut reader = CatalogReader::new(source.system_id());
        sax::parse_source(source, &mut reader)?;
        Ok(reader.entries)
    }

    /// Map `identifier` through this catalog chain
    pub fn lookup(&self, identifier: &str) -> Option<String> {
        if let Some(exact) = self.entries.iter().find_map(|entry| match entry {
            CatalogEntry::Uri { name, uri } if name == identifier => Some(uri.clone()),
            CatalogEntry::System { system_id, uri } if system_id == identifier => {
                Some(uri.clone())
            }
            _ => None,
        }) {
            return Some(exact);
        }

        let rewrite = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                CatalogEntry::RewriteUri { start, prefix }
                | CatalogEntry::RewriteSystem { start, prefix }
                    if identifier.starts_with(start.as_str()) =>
                {
                    Some((start, prefix))
                }
                _ => None,
            })
            .max_by_key(|(start, _)| start.len());
        if let Some((start, prefix)) = rewrite {
            return Some(format!("{}{}", prefix, &identifier[start.len()..]));
        }

        self.next.iter().find_map(|catalog| catalog.lookup(identifier))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len() + self.next.iter().map(Catalog::entry_count).sum::<usize>()
    }
}

/// Filesystem path of a catalog target, if it is local
fn target_path(target: &str) -> Option<PathBuf> {
    if target.starts_with("file:") {
        file_uri_to_path(target)
    } else if is_absolute_uri(target) {
        None
    } else {
        Some(PathBuf::from(target))
    }
}

/// Sink collecting catalog entries
struct CatalogReader {
    bases: Vec<String>,
    entries: Vec<CatalogEntry>,
}

impl CatalogReader {
    fn new(system_id: &str) -> Self {
        Self {
            bases: vec![system_id.to_string()],
            entries: Vec::new(),
        }
    }

    fn current_base(&self) -> &str {
        self.bases.last().map(String::as_str).unwrap_or_default()
    }

    fn absolute(&self, target: &str) -> String {
        resolve_against(target, Some(self.current_base()))
    }

    fn required<'a>(
        element: &str,
        attributes: &'a [Attribute],
        attribute: &str,
    ) -> Result<&'a str> {
        attribute_value(attributes, attribute).ok_or_else(|| {
            CatalogError::MissingAttribute {
                element: element.to_string(),
                attribute: attribute.to_string(),
            }
            .into()
        })
    }
}

impl EventSink for CatalogReader {
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        let xml_base = attributes
            .iter()
            .find(|a| a.name.local_name == "base" && a.name.prefix.as_deref() == Some("xml"))
            .map(|a| self.absolute(&a.value));
        let base = xml_base.unwrap_or_else(|| self.current_base().to_string());
        self.bases.push(base);

        // Catalogs in no namespace are accepted as well
        if name.namespace_uri.as_deref().is_some_and(|ns| ns != CATALOG_NAMESPACE) {
            return Ok(());
        }

        let local = name.local_name.as_str();
        let entry = match local {
            "uri" => CatalogEntry::Uri {
                name: Self::required(local, attributes, "name")?.to_string(),
                uri: self.absolute(Self::required(local, attributes, "uri")?),
            },
            "system" => CatalogEntry::System {
                system_id: Self::required(local, attributes, "systemId")?.to_string(),
                uri: self.absolute(Self::required(local, attributes, "uri")?),
            },
            "rewriteURI" => CatalogEntry::RewriteUri {
                start: Self::required(local, attributes, "uriStartString")?.to_string(),
                prefix: self.absolute(Self::required(local, attributes, "rewritePrefix")?),
            },
            "rewriteSystem" => CatalogEntry::RewriteSystem {
                start: Self::required(local, attributes, "systemIdStartString")?.to_string(),
                prefix: self.absolute(Self::required(local, attributes, "rewritePrefix")?),
            },
            "nextCatalog" => CatalogEntry::NextCatalog {
                catalog: self.absolute(Self::required(local, attributes, "catalog")?),
            },
            _ => return Ok(()),
        };
        self.entries.push(entry);
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        if self.bases.len() > 1 {
            self.bases.pop();
        }
        Ok(())
    }

    fn text(&mut self, _content: &str) -> Result<()> {
        Ok(())
    }
}

/// Catalog link of the resolution chain
#[derive(Debug)]
pub struct CatalogResolver {
    catalog: Option<Catalog>,
    embedded: Arc<EmbeddedResolver>,
}

impl CatalogResolver {
    pub fn empty(embedded: Arc<EmbeddedResolver>) -> Self {
        Self {
            catalog: None,
            embedded,
        }
    }

    pub fn new(catalog: Catalog, embedded: Arc<EmbeddedResolver>) -> Self {
        Self {
            catalog: Some(catalog),
            embedded,
        }
    }

    pub fn load(path: &Path, embedded: Arc<EmbeddedResolver>) -> Result<Self> {
        let catalog = Catalog::load(path)?;
        log::debug!(
            "Loaded catalog {} with {} entries",
            catalog.system_id,
            catalog.entry_count()
        );
        Ok(Self::new(catalog, embedded))
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    fn open_target(&self, target: &str) -> Option<Source> {
        if target.starts_with(EMBEDDED_SCHEME) {
            return self.embedded.lookup(target);
        }
        let path = target_path(target)?;
        if path.is_file() {
            Some(Source::from_file(path))
        } else {
            log::warn!("Catalog maps to missing resource {}", target);
            None
        }
    }
}

impl ResourceResolver for CatalogResolver {
    fn resolve(&self, reference: &str, base: Option<&str>) -> Result<Option<Source>> {
        let Some(catalog) = &self.catalog else {
            return Ok(None);
        };

        let mut candidates = vec![reference.to_string()];
        if !is_absolute_reference(reference) && base.is_some() {
            candidates.push(resolve_against(reference, base));
        }

        for candidate in candidates {
            if let Some(target) = catalog.lookup(&candidate) {
                log::debug!("Catalog maps '{}' to '{}'", candidate, target);
                if let Some(source) = self.open_target(&target) {
                    return Ok(Some(source));
                }
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "catalog"
    }
}

/// Write a catalog that rewrites each URI prefix in `mappings` to a local
/// directory and optionally chains to `next_catalog`.
pub fn generate_catalog(
    mappings: &BTreeMap<String, PathBuf>,
    next_catalog: Option<&Path>,
    destination: &Path,
) -> Result<PathBuf> {
    let mut builder = DocumentBuilder::new(None);
    let element = |local: &str| {
        QName::with_namespace(None, local, Some(CATALOG_NAMESPACE.to_string()))
    };

    let root = element("catalog");
    builder.start_element(&root, &[])?;
    for (start, directory) in mappings {
        let mut prefix = absolute_path(directory).to_string_lossy().into_owned();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let rewrite_uri = element("rewriteURI");
        builder.start_element(
            &rewrite_uri,
            &[
                Attribute::new("uriStartString", start.as_str()),
                Attribute::new("rewritePrefix", prefix.as_str()),
            ],
        )?;
        builder.end_element(&rewrite_uri)?;

        let rewrite_system = element("rewriteSystem");
        builder.start_element(
            &rewrite_system,
            &[
                Attribute::new("systemIdStartString", start.as_str()),
                Attribute::new("rewritePrefix", prefix.as_str()),
            ],
        )?;
        builder.end_element(&rewrite_system)?;
    }
    if let Some(next) = next_catalog {
        let next_element = element("nextCatalog");
        let location = absolute_path(next).to_string_lossy().into_owned();
        builder.start_element(&next_element, &[Attribute::new("catalog", location)])?;
        builder.end_element(&next_element)?;
    }
    builder.end_element(&root)?;

    serialize::write_document(&builder.into_document(), destination)
}
